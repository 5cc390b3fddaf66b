//! MySQL slow-query log parser.
//!
//! A record is a run of `#`-prefixed header lines followed by the
//! statement itself, which may span several physical lines:
//!
//! ```text
//! # Time: 2016-04-01T00:31:09.817887Z
//! # User@Host: root[root] @ localhost []  Id:   233
//! # Query_time: 0.008393  Lock_time: 0.000154 Rows_sent: 1  Rows_examined: 32
//! SET timestamp=1459470669;
//! SELECT * FROM orders WHERE id = 1;
//! ```
//!
//! `# Time:` is omitted when consecutive queries share a second, so a
//! `# User@Host:` header also closes the previous record.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use super::{sql, Parser, ParserInitError, ParserOptions};
use crate::event::{Data, Event};
use crate::tail::RawLine;

lazy_static! {
    static ref TIME_RE: Regex =
        Regex::new(r"^# Time: (?P<time>.+)$").expect("failed creating regex");
    static ref USER_HOST_RE: Regex = Regex::new(
        r"^# User@Host: (?P<user>\S+)\[[^\]]*\]\s*@\s*(?P<host>\S*)\s*\[(?P<ip>[^\]]*)\]"
    )
    .expect("failed creating regex");
    static ref QUERY_STATS_RE: Regex = Regex::new(
        r"^# Query_time: (?P<query_time>\d+(?:\.\d+)?)\s+Lock_time: (?P<lock_time>\d+(?:\.\d+)?)\s+Rows_sent: (?P<rows_sent>\d+)\s+Rows_examined: (?P<rows_examined>\d+)"
    )
    .expect("failed creating regex");
    static ref SET_TIMESTAMP_RE: Regex =
        Regex::new(r"(?i)^SET timestamp=(?P<ts>\d+);").expect("failed creating regex");
    static ref USE_DB_RE: Regex =
        Regex::new(r"(?i)^use (?P<db>\S+);").expect("failed creating regex");
}

#[derive(Debug, Clone, Default)]
pub struct Options;

#[derive(Default)]
struct Record {
    timestamp: Option<DateTime<Utc>>,
    user: Option<String>,
    client: Option<String>,
    query_time: Option<f64>,
    lock_time: Option<f64>,
    rows_sent: Option<i64>,
    rows_examined: Option<i64>,
    database: Option<String>,
    query_lines: Vec<String>,
}

impl Record {
    fn has_query(&self) -> bool {
        !self.query_lines.is_empty()
    }

    fn into_event(self) -> Option<Event> {
        if self.query_lines.is_empty() {
            return None;
        }
        let query = self.query_lines.join(" ");

        let mut data = Data::new();
        if let Some(user) = self.user {
            data.insert("user".to_string(), user.into());
        }
        if let Some(client) = self.client {
            data.insert("client".to_string(), client.into());
        }
        if let Some(query_time) = self.query_time {
            data.insert("query_time".to_string(), query_time.into());
        }
        if let Some(lock_time) = self.lock_time {
            data.insert("lock_time".to_string(), lock_time.into());
        }
        if let Some(rows_sent) = self.rows_sent {
            data.insert("rows_sent".to_string(), rows_sent.into());
        }
        if let Some(rows_examined) = self.rows_examined {
            data.insert("rows_examined".to_string(), rows_examined.into());
        }
        if let Some(database) = self.database {
            data.insert("database".to_string(), database.into());
        }
        data.insert(
            "normalized_query".to_string(),
            sql::normalize_query(&query).into(),
        );
        data.insert("query".to_string(), query.into());

        Some(Event::new(self.timestamp.unwrap_or_else(Utc::now), data))
    }
}

#[derive(Default)]
pub struct MysqlParser {
    current: Record,
    parse_failures: u64,
}

impl MysqlParser {
    async fn emit_current(&mut self, out: &Sender<Event>) {
        let record = std::mem::take(&mut self.current);
        let had_content = record.has_query() || record.user.is_some();
        match record.into_event() {
            Some(event) => {
                let _ = out.send(event).await;
            }
            None if had_content => {
                self.parse_failures += 1;
                debug!("dropping slow-log record with headers but no query");
            }
            None => {}
        }
    }

    async fn consume_line(&mut self, line: &str, out: &Sender<Event>) {
        if let Some(caps) = TIME_RE.captures(line) {
            if self.current.has_query() {
                self.emit_current(out).await;
            }
            self.current.timestamp = parse_time(caps["time"].trim());
            return;
        }
        if let Some(caps) = USER_HOST_RE.captures(line) {
            if self.current.has_query() {
                self.emit_current(out).await;
            }
            self.current.user = Some(caps["user"].to_string());
            let host = caps["host"].to_string();
            let ip = caps["ip"].to_string();
            self.current.client = Some(if host.is_empty() { ip } else { host });
            return;
        }
        if let Some(caps) = QUERY_STATS_RE.captures(line) {
            self.current.query_time = caps["query_time"].parse().ok();
            self.current.lock_time = caps["lock_time"].parse().ok();
            self.current.rows_sent = caps["rows_sent"].parse().ok();
            self.current.rows_examined = caps["rows_examined"].parse().ok();
            return;
        }
        if line.starts_with('#') {
            // Some other header (Thread_id, Schema, ...); nothing we keep.
            return;
        }
        if let Some(caps) = SET_TIMESTAMP_RE.captures(line) {
            if self.current.timestamp.is_none() {
                self.current.timestamp = caps["ts"]
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
            }
            return;
        }
        if let Some(caps) = USE_DB_RE.captures(line) {
            self.current.database = Some(caps["db"].to_string());
            return;
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            self.current.query_lines.push(trimmed.to_string());
        }
    }
}

#[async_trait]
impl Parser for MysqlParser {
    fn init(&mut self, options: &ParserOptions) -> Result<(), ParserInitError> {
        match options {
            ParserOptions::Mysql(_) => Ok(()),
            other => Err(ParserInitError(format!("mysql parser got {other:?} options"))),
        }
    }

    async fn process_lines(&mut self, mut lines: Receiver<RawLine>, out: Sender<Event>) {
        while let Some(raw) = lines.recv().await {
            self.consume_line(&raw.line, &out).await;
        }
        self.emit_current(&out).await;

        if self.parse_failures > 0 {
            warn!(count = self.parse_failures, "slow-log records dropped as unparseable");
        }
    }
}

/// `# Time:` carries either an ISO 8601 stamp (5.7+) or the legacy
/// `yymmdd h:mm:ss` form.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let squeezed: Vec<&str> = raw.split_whitespace().collect();
    let naive =
        NaiveDateTime::parse_from_str(&squeezed.join(" "), "%y%m%d %H:%M:%S").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}
