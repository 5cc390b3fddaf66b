//! The sender: multiplexes back-off delays, retries, and fresh events
//! into the transmission client.
//!
//! Every iteration applies a strict priority: pending back-off delay
//! first, then the retry queue, then the primary queue. When none of the
//! three is ready the loop idles briefly and re-polls. The loop ends when
//! the primary queue is closed and drained; whatever is left in the retry
//! queue at that point is abandoned, which is the documented lossy edge
//! of shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::debug;

use crate::event::Event;
use crate::transmission::Transmit;
use crate::SENDER_IDLE_MS;

/// Runs until the primary channel closes and drains, then fires `done`.
pub async fn run(
    mut primary: Receiver<Event>,
    mut retry: Receiver<Event>,
    mut delay: Receiver<u64>,
    client: Arc<dyn Transmit>,
    done: oneshot::Sender<()>,
) {
    loop {
        // Rate-limit back-off requested by the response handler.
        if let Ok(ms) = delay.try_recv() {
            sleep(Duration::from_millis(ms)).await;
        }

        // Events being retried go ahead of new ones.
        if let Ok(event) = retry.try_recv() {
            client.send(event.into()).await;
            continue;
        }

        match primary.try_recv() {
            Ok(event) => {
                client.send(event.into()).await;
                continue;
            }
            Err(TryRecvError::Disconnected) => {
                debug!("primary queue closed and drained; sender finishing");
                let _ = done.send(());
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        sleep(Duration::from_millis(SENDER_IDLE_MS)).await;
    }
}
