//! Field-level event mutators, chained drop → scrub → add.
//!
//! Each mutator is its own stage with a bounded hand-off to the next, so
//! the chain preserves event order and propagates backpressure without
//! buffering more than one event per stage. The chain is built once at
//! startup from the validated configuration; a chain with no mutators is
//! just the input channel.

use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, Receiver};
use serde_json::Value;

use crate::config::{AddField, Config};
use crate::event::{render_value, Event};

const STAGE_CAPACITY: usize = 1;

/// Chains the configured mutators onto `input` and returns the far end.
pub fn apply_mutators(mut input: Receiver<Event>, config: &Config) -> Receiver<Event> {
    for field in &config.drop_fields {
        input = drop_field(field.clone(), input);
    }
    for field in &config.scrub_fields {
        input = scrub_field(field.clone(), input);
    }
    for field in &config.add_fields {
        input = add_field(field.clone(), input);
    }
    input
}

/// Removes `field` from every event that carries it.
fn drop_field(field: String, mut input: Receiver<Event>) -> Receiver<Event> {
    let (tx, rx) = mpsc::channel(STAGE_CAPACITY);
    tokio::spawn(async move {
        while let Some(mut event) = input.recv().await {
            event.data.remove(&field);
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Replaces the value of `field` with the SHA-256 of its canonical string
/// rendering, as lowercase hex.
fn scrub_field(field: String, mut input: Receiver<Event>) -> Receiver<Event> {
    let (tx, rx) = mpsc::channel(STAGE_CAPACITY);
    tokio::spawn(async move {
        while let Some(mut event) = input.recv().await {
            if let Some(value) = event.data.get_mut(&field) {
                *value = Value::String(scrub_value(value));
            }
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Sets `data[key] = value` on every event, overwriting.
fn add_field(field: AddField, mut input: Receiver<Event>) -> Receiver<Event> {
    let (tx, rx) = mpsc::channel(STAGE_CAPACITY);
    tokio::spawn(async move {
        while let Some(mut event) = input.recv().await {
            event
                .data
                .insert(field.key.clone(), Value::String(field.value.clone()));
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Hashes a value's canonical rendering. An already-scrubbed value (a
/// 64-char lowercase-hex string) passes through unchanged, which makes
/// scrubbing idempotent.
fn scrub_value(value: &Value) -> String {
    if let Value::String(s) = value {
        if is_scrubbed(s) {
            return s.clone();
        }
    }
    let rendered = render_value(value);
    let digest = Sha256::digest(rendered.as_bytes());
    format!("{digest:x}")
}

fn is_scrubbed(s: &str) -> bool {
    s.len() == 64
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
