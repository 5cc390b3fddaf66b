//! Pipeline wiring: builds every stage, connects the channels, and drives
//! the shutdown cascade.
//!
//! The wiring order matters only at the edges: the transmission client
//! must exist before the sender, and the parser call is what keeps this
//! function alive. `process_lines` returns when the tailer closes the
//! line channel, after which each downstream stage drains and closes in
//! turn.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::AgentError;
use crate::event::Event;
use crate::tail::{self, TailOptions};
use crate::transmission::{Transmission, TransmissionConfig, Transmit};
use crate::{mutate, parsers, response, sender};

/// Hand-off capacity between the parser and the mutator chain. Kept at 1
/// so a stalled endpoint stalls the parser rather than piling up events.
const PARSER_CHANNEL_CAPACITY: usize = 1;

/// Runs the whole pipeline to completion. Returns only once every stage
/// has drained, or immediately with a fatal startup error.
pub async fn run(config: Config) -> Result<(), AgentError> {
    info!(parser = ?config.parser_name, files = config.files.len(), "starting agent");

    // Transmission first: everything downstream of the sender needs its
    // responses channel.
    let (transmission, workers, responses) = Transmission::start(TransmissionConfig {
        write_key: config.write_key.clone(),
        dataset: config.dataset.clone(),
        api_host: config.api_host.clone(),
        sample_rate: config.sample_rate,
        num_senders: config.num_senders,
    })?;

    // Tailer: fatal if any configured path cannot be opened.
    let (lines_rx, _tail_handles) = tail::start(
        &config.files,
        TailOptions {
            read_from: config.read_from,
            stop: config.stop,
            ..TailOptions::default()
        },
    )
    .await?;

    let (mut parser, parser_options) = parsers::build(config.parser_name);
    parser
        .init(&parser_options)
        .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;

    // Parser output, through the mutator chain, into the sender.
    let (event_tx, event_rx) = mpsc::channel::<Event>(PARSER_CHANNEL_CAPACITY);
    let mutated_rx = mutate::apply_mutators(event_rx, &config);

    // The retry path between the response handler and the sender.
    let (retry_tx, retry_rx) = mpsc::channel::<Event>(config.retry_capacity());
    let (delay_tx, delay_rx) = mpsc::channel::<u64>(config.retry_capacity());
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let stats = response::ResponseStats::new();
    let reporter = response::spawn_reporter(Arc::clone(&stats), config.status_interval);

    let client: Arc<dyn Transmit> = Arc::new(transmission);
    let sender_task = tokio::spawn(sender::run(
        mutated_rx,
        retry_rx,
        delay_rx,
        Arc::clone(&client),
        done_tx,
    ));

    let handler_task = tokio::spawn(response::handle_responses(
        responses,
        retry_tx,
        delay_tx,
        Arc::clone(&stats),
        config.backoff,
    ));

    // Does not return until the tailer closes the line channel.
    parser.process_lines(lines_rx, event_tx).await;
    debug!("parser finished; waiting for the sender to drain");

    // The mutator chain drains into the sender, which signals done once
    // the primary path is empty.
    let _ = done_rx.await;
    let _ = sender_task.await;

    // Dropping the last client handle closes the work queue; the workers
    // drain, the responses channel closes, and the handler exits.
    drop(client);
    workers.drain().await;
    let _ = handler_task.await;

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    stats.log_and_reset();

    info!("agent finished");
    Ok(())
}
