//! nginx access-log parser (common and combined formats).
//!
//! ```text
//! 127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326 "-" "Mozilla/4.08"
//! ```

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
    static ref ACCESS_RE: Regex = Regex::new(
        r#"(?x)
        ^(?P<remote_addr>\S+)\ \S+\ (?P<remote_user>\S+)
        \ \[(?P<time_local>[^\]]+)\]
        \ "(?P<request>[^"]*)"
        \ (?P<status>\d{3})\ (?P<body_bytes_sent>\d+|-)
        (?:\ "(?P<http_referer>[^"]*)"\ "(?P<http_user_agent>[^"]*)")?"#
    )
    .expect("failed creating regex");
}

/// Which `log_format` the server writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Combined,
    Common,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub format: LogFormat,
}

#[derive(Default)]
pub struct NginxParser {
    format: LogFormat,
    parse_failures: u64,
}

#[async_trait]
impl Parser for NginxParser {
    fn init(&mut self, options: &ParserOptions) -> Result<(), ParserInitError> {
        match options {
            ParserOptions::Nginx(opts) => {
                self.format = opts.format;
                Ok(())
            }
            other => Err(ParserInitError(format!("nginx parser got {other:?} options"))),
        }
    }

    async fn process_lines(&mut self, mut lines: Receiver<RawLine>, out: Sender<Event>) {
        while let Some(raw) = lines.recv().await {
            if raw.line.trim().is_empty() {
                continue;
            }
            match parse_line(&raw.line, self.format) {
                Some(event) => {
                    let _ = out.send(event).await;
                }
                None => {
                    self.parse_failures += 1;
                    debug!(line = %raw.line, "dropping unparseable access-log line");
                }
            }
        }

        if self.parse_failures > 0 {
            warn!(count = self.parse_failures, "lines dropped as unparseable");
        }
    }
}

fn parse_line(line: &str, format: LogFormat) -> Option<Event> {
    let caps = ACCESS_RE.captures(line)?;

    let timestamp = DateTime::parse_from_str(&caps["time_local"], "%d/%b/%Y:%H:%M:%S %z")
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    let mut data = Data::new();
    data.insert("remote_addr".to_string(), caps["remote_addr"].into());
    if &caps["remote_user"] != "-" {
        data.insert("remote_user".to_string(), caps["remote_user"].into());
    }
    data.insert("status".to_string(), caps["status"].parse::<i64>().ok()?.into());

    let bytes = match &caps["body_bytes_sent"] {
        "-" => 0,
        raw => raw.parse::<i64>().ok()?,
    };
    data.insert("body_bytes_sent".to_string(), bytes.into());

    let request = caps["request"].to_string();
    let mut parts = request.split_whitespace();
    if let (Some(method), Some(path), Some(protocol)) = (parts.next(), parts.next(), parts.next())
    {
        data.insert("method".to_string(), method.into());
        data.insert("path".to_string(), path.into());
        data.insert("protocol".to_string(), protocol.into());
    }
    data.insert("request".to_string(), request.into());

    if format == LogFormat::Combined {
        if let Some(referer) = caps.name("http_referer") {
            if referer.as_str() != "-" {
                data.insert("http_referer".to_string(), referer.as_str().into());
            }
        }
        if let Some(agent) = caps.name("http_user_agent") {
            data.insert("http_user_agent".to_string(), agent.as_str().into());
        }
    }

    Some(Event::new(timestamp, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserName;
    use crate::parsers::test_support::run_parser;
    use chrono::TimeZone;
    use serde_json::json;

    async fn parse_lines(lines: &[&str]) -> Vec<Event> {
        let (parser, options) = crate::parsers::build(ParserName::Nginx);
        run_parser(parser, options, lines).await
    }

    #[tokio::test]
    async fn test_combined_line() {
        let events = parse_lines(&[
            r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326 "http://example.com/start" "Mozilla/4.08""#,
        ])
        .await;

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2000, 10, 10, 20, 55, 36).unwrap()
        );
        assert_eq!(event.data["remote_addr"], json!("127.0.0.1"));
        assert_eq!(event.data["remote_user"], json!("frank"));
        assert_eq!(event.data["status"], json!(200));
        assert_eq!(event.data["body_bytes_sent"], json!(2326));
        assert_eq!(event.data["method"], json!("GET"));
        assert_eq!(event.data["path"], json!("/apache_pb.gif"));
        assert_eq!(event.data["protocol"], json!("HTTP/1.0"));
        assert_eq!(event.data["http_referer"], json!("http://example.com/start"));
        assert_eq!(event.data["http_user_agent"], json!("Mozilla/4.08"));
    }

    #[tokio::test]
    async fn test_dash_fields_omitted() {
        let events = parse_lines(&[
            r#"10.0.0.1 - - [10/Oct/2000:13:55:36 +0000] "POST /login HTTP/1.1" 401 - "-" "curl/7.9""#,
        ])
        .await;

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(!event.data.contains_key("remote_user"));
        assert!(!event.data.contains_key("http_referer"));
        assert_eq!(event.data["body_bytes_sent"], json!(0));
        assert_eq!(event.data["status"], json!(401));
    }

    #[tokio::test]
    async fn test_status_is_numeric() {
        let events = parse_lines(&[
            r#"10.0.0.1 - - [10/Oct/2000:13:55:36 +0000] "GET / HTTP/1.1" 503 17 "-" "-""#,
        ])
        .await;
        assert!(events[0].data["status"].is_i64());
        assert!(events[0].data["body_bytes_sent"].is_i64());
    }

    #[tokio::test]
    async fn test_garbage_dropped() {
        let events = parse_lines(&["completely unrelated text"]).await;
        assert!(events.is_empty());
    }
}
