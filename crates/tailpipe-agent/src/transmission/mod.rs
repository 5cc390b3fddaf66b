//! HTTP transmission client: a bounded work queue drained by a pool of
//! sender workers.
//!
//! The client is deliberately blocking at both edges:
//! - [`Transmission::send`] blocks when the work queue is full, so a slow
//!   endpoint pushes back through the sender and the mutator chain all the
//!   way to the tailer instead of dropping lines;
//! - workers block pushing onto the responses channel, so an idle response
//!   handler throttles transmission rather than losing accounting.
//!
//! Exactly one [`Response`] is produced per event handed to the client;
//! events sampled away still get one, with [`SAMPLED_ERROR`] set.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::AgentError;
use crate::event::{Data, Event};

/// Error string on responses for events dropped by sampling.
pub const SAMPLED_ERROR: &str = "event dropped due to sampling";

/// Work-queue slots per sender worker.
const PENDING_WORK_PER_SENDER: usize = 8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What the sender hands to the client: the event's wire fields plus the
/// originating event in an opaque slot so the response handler can recover
/// it for retries.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub timestamp: DateTime<Utc>,
    pub data: Data,
    pub metadata: Option<Event>,
}

impl From<Event> for OutboundEvent {
    fn from(event: Event) -> Self {
        OutboundEvent {
            timestamp: event.timestamp,
            data: event.data.clone(),
            metadata: Some(event),
        }
    }
}

impl OutboundEvent {
    /// JSON body: the data fields plus a top-level RFC 3339 timestamp.
    fn wire_body(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        for (key, value) in &self.data {
            obj.insert(key.clone(), value.clone());
        }
        Value::Object(obj)
    }
}

/// Record of one attempted send.
#[derive(Debug)]
pub struct Response {
    /// HTTP status, or 0 when no response was received.
    pub status_code: u16,
    pub body: Vec<u8>,
    pub duration: Duration,
    pub error: Option<String>,
    /// The originating event, recovered by the response handler.
    pub metadata: Option<Event>,
}

/// The contract the sender depends on: hand an event over without
/// awaiting the network round-trip.
#[async_trait]
pub trait Transmit: Send + Sync {
    async fn send(&self, event: OutboundEvent);
}

#[derive(Debug, Clone)]
pub struct TransmissionConfig {
    pub write_key: String,
    pub dataset: String,
    pub api_host: String,
    pub sample_rate: u32,
    pub num_senders: usize,
}

/// Front half of the client; [`Transmit::send`] enqueues work for the
/// worker pool.
pub struct Transmission {
    work_tx: Sender<OutboundEvent>,
    responses_tx: Sender<Response>,
    sample_rate: u32,
    seen: AtomicU64,
}

/// Owns the worker tasks so the agent can drain them at shutdown.
pub struct TransmissionWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl TransmissionWorkers {
    /// Waits for every worker to finish. Meaningful only after the last
    /// [`Transmission`] clone is dropped, which closes the work queue.
    pub async fn drain(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Transmission {
    /// Builds the client and spawns the worker pool. The returned
    /// responses channel closes once the client is dropped and the
    /// workers have drained.
    pub fn start(
        config: TransmissionConfig,
    ) -> Result<(Transmission, TransmissionWorkers, Receiver<Response>), AgentError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::TransmissionBuild(e.to_string()))?;

        let capacity = PENDING_WORK_PER_SENDER * config.num_senders;
        let (work_tx, work_rx) = mpsc::channel::<OutboundEvent>(capacity);
        let (responses_tx, responses_rx) = mpsc::channel::<Response>(capacity);

        let url = format!(
            "{}/1/events/{}",
            config.api_host.trim_end_matches('/'),
            config.dataset
        );
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut handles = Vec::with_capacity(config.num_senders);
        for _ in 0..config.num_senders {
            handles.push(tokio::spawn(worker(
                http.clone(),
                url.clone(),
                config.write_key.clone(),
                Arc::clone(&work_rx),
                responses_tx.clone(),
            )));
        }

        let transmission = Transmission {
            work_tx,
            responses_tx,
            sample_rate: config.sample_rate,
            seen: AtomicU64::new(0),
        };

        Ok((transmission, TransmissionWorkers { handles }, responses_rx))
    }
}

#[async_trait]
impl Transmit for Transmission {
    async fn send(&self, event: OutboundEvent) {
        if !keep_event(&self.seen, self.sample_rate) {
            let response = Response {
                status_code: 0,
                body: Vec::new(),
                duration: Duration::ZERO,
                error: Some(SAMPLED_ERROR.to_string()),
                metadata: event.metadata,
            };
            let _ = self.responses_tx.send(response).await;
            return;
        }
        if self.work_tx.send(event).await.is_err() {
            error!("transmission workers gone; dropping event");
        }
    }
}

/// Keep one of every `sample_rate` events. A counter rather than a coin
/// flip, so a short stream still sends its share.
fn keep_event(seen: &AtomicU64, sample_rate: u32) -> bool {
    if sample_rate <= 1 {
        return true;
    }
    seen.fetch_add(1, Ordering::Relaxed) % u64::from(sample_rate) == 0
}

async fn worker(
    http: reqwest::Client,
    url: String,
    write_key: String,
    work_rx: Arc<Mutex<Receiver<OutboundEvent>>>,
    responses_tx: Sender<Response>,
) {
    loop {
        let event = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let Some(event) = event else {
            // Work queue closed and drained; this worker is done.
            return;
        };

        let response = attempt_send(&http, &url, &write_key, &event).await;
        if responses_tx.send(response).await.is_err() {
            debug!("response channel closed; accounting lost");
        }
    }
}

async fn attempt_send(
    http: &reqwest::Client,
    url: &str,
    write_key: &str,
    event: &OutboundEvent,
) -> Response {
    let started = Instant::now();
    let result = http
        .post(url)
        .header("X-API-Key", write_key)
        .json(&event.wire_body())
        .send()
        .await;
    let duration = started.elapsed();

    match result {
        Ok(resp) => {
            let status_code = resp.status().as_u16();
            let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            Response {
                status_code,
                body,
                duration,
                error: None,
                metadata: event.metadata.clone(),
            }
        }
        Err(err) => Response {
            status_code: 0,
            body: Vec::new(),
            duration,
            error: Some(err.to_string()),
            metadata: event.metadata.clone(),
        },
    }
}
