//! MongoDB server log parser (the 3.x text format).
//!
//! ```text
//! 2017-08-14T11:30:34.347-0400 I COMMAND  [conn3] command test.foo command: insert { ... } ... 2ms
//! ```
//!
//! One line per record; no grouping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use super::{Parser, ParserInitError, ParserOptions};
use crate::event::{Data, Event};
use crate::tail::RawLine;

lazy_static! {
    static ref LINE_RE: Regex = Regex::new(
        r"^(?P<timestamp>\S+) (?P<severity>[DIWEF]) (?P<component>\S+)\s+\[(?P<context>[^\]]+)\] (?P<message>.*)$"
    )
    .expect("failed creating regex");
    static ref NAMESPACE_RE: Regex = Regex::new(
        r"^(?:command|query|update|insert|remove|getmore|killcursors) (?P<namespace>[\w$]+\.[\w.$]+)"
    )
    .expect("failed creating regex");
    static ref DURATION_RE: Regex =
        Regex::new(r" (?P<ms>\d+)ms$").expect("failed creating regex");
}

#[derive(Debug, Clone, Default)]
pub struct Options;

#[derive(Default)]
pub struct MongoParser {
    parse_failures: u64,
}

#[async_trait]
impl Parser for MongoParser {
    fn init(&mut self, options: &ParserOptions) -> Result<(), ParserInitError> {
        match options {
            ParserOptions::Mongo(_) => Ok(()),
            other => Err(ParserInitError(format!("mongo parser got {other:?} options"))),
        }
    }

    async fn process_lines(&mut self, mut lines: Receiver<RawLine>, out: Sender<Event>) {
        while let Some(raw) = lines.recv().await {
            if raw.line.trim().is_empty() {
                continue;
            }
            match parse_line(&raw.line) {
                Some(event) => {
                    let _ = out.send(event).await;
                }
                None => {
                    self.parse_failures += 1;
                    debug!(line = %raw.line, "dropping unparseable mongod line");
                }
            }
        }

        if self.parse_failures > 0 {
            warn!(count = self.parse_failures, "lines dropped as unparseable");
        }
    }
}

fn parse_line(line: &str) -> Option<Event> {
    let caps = LINE_RE.captures(line)?;

    let timestamp = parse_timestamp(&caps["timestamp"]).unwrap_or_else(Utc::now);
    let message = caps["message"].to_string();

    let mut data = Data::new();
    data.insert("severity".to_string(), severity_name(&caps["severity"]).into());
    data.insert("component".to_string(), caps["component"].into());
    data.insert("context".to_string(), caps["context"].into());

    if let Some(ns) = NAMESPACE_RE.captures(&message) {
        data.insert("namespace".to_string(), ns["namespace"].into());
    }
    if let Some(ms) = DURATION_RE.captures(&message) {
        if let Ok(parsed) = ms["ms"].parse::<i64>() {
            data.insert("duration_ms".to_string(), parsed.into());
        }
    }
    data.insert("message".to_string(), message.into());

    Some(Event::new(timestamp, data))
}

fn severity_name(letter: &str) -> &'static str {
    match letter {
        "D" => "debug",
        "I" => "info",
        "W" => "warn",
        "E" => "error",
        "F" => "fatal",
        _ => "unknown",
    }
}

/// mongod writes `2017-08-14T11:30:34.347-0400` (no colon in the offset).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
