//! Parser scaffolding: the trait every dialect implements plus the
//! name-based registry.
//!
//! A parser consumes the tailer's line channel and emits [`Event`]s. Some
//! dialects span records across physical lines (PostgreSQL and MySQL slow
//! logs); grouping is the parser's own business, bounded by the contract
//! that any buffered group is flushed when the input channel closes.
//!
//! A line that cannot be parsed is dropped with a diagnostic and counted;
//! it never blocks the pipeline and never produces a partial event.

use async_trait::async_trait;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::config::ParserName;
use crate::event::Event;
use crate::tail::RawLine;

pub mod json;
pub mod mongodb;
pub mod mysql;
pub mod nginx;
pub mod postgresql;
pub mod sql;

/// A parser rejected its options. Fatal at startup.
#[derive(Debug, thiserror::Error)]
#[error("Failed to initialize parser: {0}")]
pub struct ParserInitError(pub String);

/// Dialect-specific configuration, one variant per parser. Each parser
/// accepts only its own variant.
#[derive(Debug, Clone)]
pub enum ParserOptions {
    Nginx(nginx::Options),
    Json(json::Options),
    Mongo(mongodb::Options),
    Mysql(mysql::Options),
    Postgresql(postgresql::Options),
}

/// A log-dialect parser.
#[async_trait]
pub trait Parser: Send {
    /// Prepares per-parser state. Called exactly once, before
    /// [`Parser::process_lines`].
    fn init(&mut self, options: &ParserOptions) -> Result<(), ParserInitError>;

    /// Consumes `lines` until it closes, emitting events on `out`.
    /// Buffered multi-line groups are flushed on close; `out` is dropped
    /// on return, closing the downstream stage.
    async fn process_lines(&mut self, lines: Receiver<RawLine>, out: Sender<Event>);
}

/// Returns the parser for a dialect name together with its default
/// options. Unknown names never reach this point; the CLI enum rejects
/// them first.
pub fn build(name: ParserName) -> (Box<dyn Parser>, ParserOptions) {
    match name {
        ParserName::Nginx => (
            Box::new(nginx::NginxParser::default()),
            ParserOptions::Nginx(nginx::Options::default()),
        ),
        ParserName::Json => (
            Box::new(json::JsonParser::default()),
            ParserOptions::Json(json::Options::default()),
        ),
        ParserName::Mongo => (
            Box::new(mongodb::MongoParser::default()),
            ParserOptions::Mongo(mongodb::Options::default()),
        ),
        ParserName::Mysql => (
            Box::new(mysql::MysqlParser::default()),
            ParserOptions::Mysql(mysql::Options::default()),
        ),
        ParserName::Postgresql => (
            Box::new(postgresql::PostgresqlParser::default()),
            ParserOptions::Postgresql(postgresql::Options::default()),
        ),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Runs a parser over a fixed set of lines and collects every event it
    /// emits, closing the input afterwards so buffered groups flush.
    pub async fn run_parser(mut parser: Box<dyn Parser>, options: ParserOptions, lines: &[&str]) -> Vec<Event> {
        parser.init(&options).expect("parser init");

        let (line_tx, line_rx) = mpsc::channel::<RawLine>(64);
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(64);
        let path = Arc::new(PathBuf::from("/var/log/test.log"));

        for line in lines {
            line_tx
                .send(RawLine {
                    line: (*line).to_string(),
                    path: Arc::clone(&path),
                })
                .await
                .expect("send line");
        }
        drop(line_tx);

        parser.process_lines(line_rx, event_tx).await;

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
