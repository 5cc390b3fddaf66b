//! JSON-lines parser: one JSON object per line, fields become the event's
//! attribute map.
//!
//! The event timestamp comes from a configurable time field (by default
//! `time` or `timestamp`), accepted as RFC 3339, a common datetime
//! spelling, or epoch seconds; the consumed field is removed from the
//! data. Anything else falls back to the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use super::{Parser, ParserInitError, ParserOptions};
use crate::event::{Data, Event};
use crate::tail::RawLine;

const DEFAULT_TIME_FIELDS: [&str; 2] = ["time", "timestamp"];

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Field holding the event time; `None` tries `time`, then `timestamp`.
    pub time_field: Option<String>,
}

#[derive(Default)]
pub struct JsonParser {
    time_field: Option<String>,
    parse_failures: u64,
}

#[async_trait]
impl Parser for JsonParser {
    fn init(&mut self, options: &ParserOptions) -> Result<(), ParserInitError> {
        match options {
            ParserOptions::Json(opts) => {
                self.time_field = opts.time_field.clone();
                Ok(())
            }
            other => Err(ParserInitError(format!("json parser got {other:?} options"))),
        }
    }

    async fn process_lines(&mut self, mut lines: Receiver<RawLine>, out: Sender<Event>) {
        while let Some(raw) = lines.recv().await {
            if raw.line.trim().is_empty() {
                continue;
            }
            match self.parse_line(&raw.line) {
                Some(event) => {
                    let _ = out.send(event).await;
                }
                None => {
                    self.parse_failures += 1;
                    debug!(line = %raw.line, "dropping non-object JSON line");
                }
            }
        }

        if self.parse_failures > 0 {
            warn!(count = self.parse_failures, "lines dropped as unparseable");
        }
    }
}

impl JsonParser {
    fn parse_line(&self, line: &str) -> Option<Event> {
        let Value::Object(fields) = serde_json::from_str::<Value>(line).ok()? else {
            return None;
        };

        // Attribute keys are never empty.
        let mut data: Data = fields
            .into_iter()
            .filter(|(key, _)| !key.is_empty())
            .collect();

        let candidates: Vec<&str> = match &self.time_field {
            Some(name) => vec![name.as_str()],
            None => DEFAULT_TIME_FIELDS.to_vec(),
        };

        let mut timestamp = None;
        for name in candidates {
            if let Some(value) = data.get(name) {
                if let Some(parsed) = parse_time_value(value) {
                    timestamp = Some(parsed);
                    data.remove(name);
                    break;
                }
            }
        }

        Some(Event::new(timestamp.unwrap_or_else(Utc::now), data))
    }
}

fn parse_time_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        }
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                return Utc.timestamp_opt(secs, 0).single();
            }
            n.as_f64().and_then(|secs| {
                Utc.timestamp_opt(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
                    .single()
            })
        }
        _ => None,
    }
}
