//! PostgreSQL slow-query log parser.
//!
//! Understands the stock `log_min_duration_statement` output:
//!
//! ```text
//! 2017-11-07 00:05:16 UTC [3053-3] postgres@postgres LOG:  duration: 0.681 ms  statement: SELECT 1;
//! ```
//!
//! A statement may continue across physical lines; every line that does
//! not start with the leading timestamp belongs to the current record.
//! Continuations are trimmed and joined with single spaces, so the emitted
//! `query` reads as one statement.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use super::{sql, Parser, ParserInitError, ParserOptions};
use crate::event::{Data, Event};
use crate::tail::RawLine;

lazy_static! {
    /// Marks the start of a record: a leading `YYYY-MM-DD HH:MM:SS` stamp.
    static ref LEADING_RE: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").expect("failed creating regex");

    /// Parses a whole (joined) slow-query record.
    static ref RECORD_RE: Regex = Regex::new(
        r"(?x)
        ^(?P<timestamp>\d{4}-\d{2}-\d{2}\ \d{2}:\d{2}:\d{2}(?:\.\d+)?)\ (?P<tz>\S+)
        \ \[(?P<pid>\d+)-(?P<session_id>\d+)\]
        \ (?P<user>[^@\s]+)@(?P<database>\S+)
        \ LOG:\s+duration:\ (?P<duration>\d+(?:\.\d+)?)\ ms
        \s+(?:statement|execute\ [^:]+):\ (?P<query>.*)$"
    )
    .expect("failed creating regex");
}

#[derive(Debug, Clone, Default)]
pub struct Options;

#[derive(Default)]
pub struct PostgresqlParser {
    group: Vec<String>,
    parse_failures: u64,
}

impl PostgresqlParser {
    fn take_group(&mut self) -> Option<String> {
        if self.group.is_empty() {
            return None;
        }
        Some(self.group.drain(..).collect::<Vec<_>>().join(" "))
    }

    async fn emit_group(&mut self, out: &Sender<Event>) {
        let Some(record) = self.take_group() else {
            return;
        };
        match parse_record(&record) {
            Some(event) => {
                let _ = out.send(event).await;
            }
            None => {
                self.parse_failures += 1;
                debug!(record = %record, "dropping unparseable slow-query record");
            }
        }
    }
}

#[async_trait]
impl Parser for PostgresqlParser {
    fn init(&mut self, options: &ParserOptions) -> Result<(), ParserInitError> {
        match options {
            ParserOptions::Postgresql(_) => Ok(()),
            other => Err(ParserInitError(format!(
                "postgresql parser got {other:?} options"
            ))),
        }
    }

    async fn process_lines(&mut self, mut lines: Receiver<RawLine>, out: Sender<Event>) {
        while let Some(raw) = lines.recv().await {
            if LEADING_RE.is_match(&raw.line) {
                self.emit_group(&out).await;
                self.group.push(raw.line);
            } else if !self.group.is_empty() {
                self.group.push(raw.line.trim().to_string());
            } else if !raw.line.trim().is_empty() {
                self.parse_failures += 1;
                debug!(line = %raw.line, "dropping line outside any record");
            }
        }
        self.emit_group(&out).await;

        if self.parse_failures > 0 {
            warn!(count = self.parse_failures, "lines dropped as unparseable");
        }
    }
}

fn parse_record(record: &str) -> Option<Event> {
    let caps = RECORD_RE.captures(record)?;

    let timestamp = parse_timestamp(&caps["timestamp"]).unwrap_or_else(Utc::now);
    let query = caps["query"].trim().to_string();

    let mut data = Data::new();
    data.insert("user".to_string(), caps["user"].into());
    data.insert("database".to_string(), caps["database"].into());
    data.insert(
        "duration".to_string(),
        caps["duration"].parse::<f64>().ok()?.into(),
    );
    data.insert("pid".to_string(), caps["pid"].parse::<i64>().ok()?.into());
    data.insert(
        "session_id".to_string(),
        caps["session_id"].parse::<i64>().ok()?.into(),
    );
    data.insert(
        "normalized_query".to_string(),
        sql::normalize_query(&query).into(),
    );
    data.insert("query".to_string(), query.into());

    Some(Event::new(timestamp, data))
}

/// The stamp is `local time + zone name`; anything we cannot resolve is
/// read as UTC rather than dropped.
fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}
