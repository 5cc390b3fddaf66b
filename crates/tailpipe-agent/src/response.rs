//! Response accounting and the retry decision.
//!
//! The handler consumes every [`Response`] the transmission client emits,
//! feeds the shared [`ResponseStats`] aggregate, and re-injects retryable
//! failures into the sender's retry queue together with a back-off delay.
//! Retryable means: back-off is enabled and the status is 429 or 500.
//! Nothing else is ever retried.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::Event;
use crate::transmission::{Response, SAMPLED_ERROR};
use crate::BACKOFF_DELAY_MS;

/// One reporting interval's worth of counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Responses bucketed by HTTP status (0 = no response).
    pub by_status: BTreeMap<u16, u64>,
    /// Responses bucketed by error string.
    pub by_error: BTreeMap<String, u64>,
    pub attempted: u64,
    pub retried: u64,
}

/// Process-scoped response aggregate. The mutex is held only for a single
/// counter bump or one snapshot-and-reset, so reporting is atomic with
/// respect to updates.
#[derive(Debug, Default)]
pub struct ResponseStats {
    inner: Mutex<StatsSnapshot>,
}

impl ResponseStats {
    pub fn new() -> Arc<Self> {
        Arc::new(ResponseStats::default())
    }

    pub fn update(&self, response: &Response) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.attempted += 1;
        match &response.error {
            Some(err) => *inner.by_error.entry(err.clone()).or_insert(0) += 1,
            None => *inner.by_status.entry(response.status_code).or_insert(0) += 1,
        }
    }

    pub fn note_retry(&self) {
        self.inner.lock().expect("stats lock poisoned").retried += 1;
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        std::mem::take(&mut *inner)
    }

    /// Logs the interval summary and starts a fresh one.
    pub fn log_and_reset(&self) {
        let snapshot = self.snapshot_and_reset();
        info!(
            attempted = snapshot.attempted,
            retried = snapshot.retried,
            statuses = ?snapshot.by_status,
            errors = ?snapshot.by_error,
            "response summary"
        );
    }
}

/// Spawns the periodic stats reporter. An interval of 0 disables it.
pub fn spawn_reporter(stats: Arc<ResponseStats>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    debug!(interval_secs, "reporting response stats periodically");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await; // the interval's immediate first tick
        loop {
            ticker.tick().await;
            stats.log_and_reset();
        }
    }))
}

/// Consumes responses until the channel closes.
pub async fn handle_responses(
    mut responses: Receiver<Response>,
    retry_tx: Sender<Event>,
    delay_tx: Sender<u64>,
    stats: Arc<ResponseStats>,
    backoff: bool,
) {
    while let Some(response) = responses.recv().await {
        stats.update(&response);

        let retryable =
            backoff && (response.status_code == 429 || response.status_code == 500);

        if retryable {
            let Some(event) = response.metadata else {
                error!(
                    status_code = response.status_code,
                    "retryable response carries no originating event; dropping"
                );
                continue;
            };
            // A delay may already be pending; one back-off at a time is
            // all the sender honors anyway.
            let _ = delay_tx.try_send(BACKOFF_DELAY_MS);
            match retry_tx.try_send(event) {
                Ok(()) => stats.note_retry(),
                Err(_) => warn!("retry queue full; dropping retryable event"),
            }
            debug!(
                status_code = response.status_code,
                duration_ms = response.duration.as_millis() as u64,
                retry_send = true,
                "event send record received"
            );
            continue;
        }

        let body = String::from_utf8_lossy(&response.body);
        match &response.error {
            Some(err) if err.as_str() == SAMPLED_ERROR => {
                debug!(retry_send = false, "event sampled before send");
            }
            Some(err) => {
                error!(error = %err, retry_send = false, "event transmission failed");
            }
            None if response.status_code >= 400 => {
                error!(
                    status_code = response.status_code,
                    body = %body.trim(),
                    retry_send = false,
                    "event rejected by endpoint"
                );
            }
            None => {
                debug!(
                    status_code = response.status_code,
                    body = %body.trim(),
                    duration_ms = response.duration.as_millis() as u64,
                    retry_send = false,
                    "event send record received"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Data;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn response(status_code: u16, error: Option<&str>, with_event: bool) -> Response {
        Response {
            status_code,
            body: Vec::new(),
            duration: Duration::from_millis(5),
            error: error.map(String::from),
            metadata: with_event.then(|| Event::new(Utc::now(), Data::new())),
        }
    }

    #[test]
    fn test_stats_bucket_by_status_and_error() {
        let stats = ResponseStats::new();
        stats.update(&response(200, None, false));
        stats.update(&response(200, None, false));
        stats.update(&response(429, None, false));
        stats.update(&response(0, Some("connection refused"), false));

        let snapshot = stats.snapshot_and_reset();
        assert_eq!(snapshot.attempted, 4);
        assert_eq!(snapshot.by_status[&200], 2);
        assert_eq!(snapshot.by_status[&429], 1);
        assert_eq!(snapshot.by_error["connection refused"], 1);
    }

    #[test]
    fn test_snapshot_resets() {
        let stats = ResponseStats::new();
        stats.update(&response(200, None, false));
        stats.note_retry();

        let first = stats.snapshot_and_reset();
        assert_eq!(first.attempted, 1);
        assert_eq!(first.retried, 1);

        let second = stats.snapshot_and_reset();
        assert_eq!(second, StatsSnapshot::default());
    }

    async fn run_handler(
        responses: Vec<Response>,
        backoff: bool,
    ) -> (Vec<Event>, Vec<u64>, StatsSnapshot) {
        let (response_tx, response_rx) = mpsc::channel(16);
        let (retry_tx, mut retry_rx) = mpsc::channel(16);
        let (delay_tx, mut delay_rx) = mpsc::channel(16);
        let stats = ResponseStats::new();

        for r in responses {
            response_tx.send(r).await.unwrap();
        }
        drop(response_tx);

        handle_responses(response_rx, retry_tx, delay_tx, Arc::clone(&stats), backoff).await;

        let mut retried = Vec::new();
        while let Ok(event) = retry_rx.try_recv() {
            retried.push(event);
        }
        let mut delays = Vec::new();
        while let Ok(ms) = delay_rx.try_recv() {
            delays.push(ms);
        }
        (retried, delays, stats.snapshot_and_reset())
    }

    #[tokio::test]
    async fn test_429_reinjected_with_backoff() {
        let (retried, delays, snapshot) =
            run_handler(vec![response(429, None, true)], true).await;
        assert_eq!(retried.len(), 1);
        assert_eq!(delays, vec![BACKOFF_DELAY_MS]);
        assert_eq!(snapshot.retried, 1);
    }

    #[tokio::test]
    async fn test_500_reinjected_with_backoff() {
        let (retried, _delays, snapshot) =
            run_handler(vec![response(500, None, true)], true).await;
        assert_eq!(retried.len(), 1);
        assert_eq!(snapshot.retried, 1);
    }

    #[tokio::test]
    async fn test_other_5xx_not_retried() {
        let (retried, delays, snapshot) =
            run_handler(vec![response(503, None, true)], true).await;
        assert!(retried.is_empty());
        assert!(delays.is_empty());
        assert_eq!(snapshot.retried, 0);
    }

    #[tokio::test]
    async fn test_429_dropped_without_backoff_flag() {
        let (retried, delays, _snapshot) =
            run_handler(vec![response(429, None, true)], false).await;
        assert!(retried.is_empty());
        assert!(delays.is_empty());
    }

    #[tokio::test]
    async fn test_retry_queue_stays_bounded() {
        // A full retry queue never blocks the handler; overflow is dropped.
        let (response_tx, response_rx) = mpsc::channel(16);
        let (retry_tx, mut retry_rx) = mpsc::channel(1);
        let (delay_tx, _delay_rx) = mpsc::channel(16);
        let stats = ResponseStats::new();

        for _ in 0..3 {
            response_tx.send(response(429, None, true)).await.unwrap();
        }
        drop(response_tx);

        handle_responses(response_rx, retry_tx, delay_tx, Arc::clone(&stats), true).await;

        let mut retried = 0;
        while retry_rx.try_recv().is_ok() {
            retried += 1;
        }
        assert_eq!(retried, 1);
        assert_eq!(stats.snapshot_and_reset().retried, 1);
    }

    #[tokio::test]
    async fn test_missing_metadata_logged_and_dropped() {
        let (retried, _delays, snapshot) =
            run_handler(vec![response(429, None, false)], true).await;
        assert!(retried.is_empty());
        assert_eq!(snapshot.attempted, 1);
        assert_eq!(snapshot.retried, 0);
    }

    #[tokio::test]
    async fn test_transport_error_counted_not_retried() {
        let (retried, _delays, snapshot) =
            run_handler(vec![response(0, Some("timeout"), true)], true).await;
        assert!(retried.is_empty());
        assert_eq!(snapshot.by_error["timeout"], 1);
    }

    #[tokio::test]
    async fn test_reporter_disabled_at_zero() {
        let stats = ResponseStats::new();
        assert!(spawn_reporter(stats, 0).is_none());
    }

    #[tokio::test]
    async fn test_reporter_drains_stats() {
        let stats = ResponseStats::new();
        stats.update(&response(200, None, false));

        let reporter = spawn_reporter(Arc::clone(&stats), 1).expect("reporter spawns");

        // After one interval the reporter must have consumed the counters.
        let waited = timeout(Duration::from_secs(3), async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
        })
        .await;
        assert!(waited.is_ok());
        assert_eq!(stats.snapshot_and_reset(), StatsSnapshot::default());
        reporter.abort();
    }
}
