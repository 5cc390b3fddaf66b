//! CLI surface and validated runtime configuration.
//!
//! The user-facing argument set (`Args`) is kept private to this layer;
//! the rest of the crate sees only the validated [`Config`]. Configuration
//! errors (unknown parser, malformed `--add_field`) are fatal at startup
//! and never reach the pipeline.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::error::AgentError;

/// Which parser interprets the tailed lines. Unknown values are rejected
/// by clap before the agent starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParserName {
    Nginx,
    Json,
    #[value(alias = "mongodb")]
    Mongo,
    Mysql,
    Postgresql,
}

/// Where tailing starts for each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReadFrom {
    /// Read the file from offset 0.
    Beginning,
    /// Start at the current end of file.
    End,
    /// Accepted for compatibility; there is no persisted cursor, so this
    /// behaves as `end`.
    Last,
}

/// A validated `key=value` pair for the add mutator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddField {
    pub key: String,
    pub value: String,
}

impl AddField {
    /// Splits on the first `=` only; the value may itself contain `=`.
    fn parse(raw: &str) -> Result<Self, AgentError> {
        match raw.split_once('=') {
            Some((key, value)) => Ok(AddField {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Err(AgentError::InvalidConfig(format!(
                "unable to separate add_field {raw:?} into a key=val pair"
            ))),
        }
    }
}

/// User-facing CLI arguments (kept private to the CLI layer).
#[derive(Parser, Debug)]
#[command(name = "tailpipe", version, about = "Tail log files and forward structured events over HTTP")]
struct Args {
    /// Log file to tail (repeatable)
    #[arg(long = "file", short = 'f', value_name = "PATH", required = true)]
    files: Vec<PathBuf>,

    /// Parser that interprets the tailed lines
    #[arg(long = "parser_name", value_enum)]
    parser_name: ParserName,

    /// API key sent with every outbound event
    #[arg(long = "write_key")]
    write_key: String,

    /// Dataset the events are written to
    #[arg(long = "dataset")]
    dataset: String,

    /// Base URL of the ingestion endpoint
    #[arg(long = "api_host")]
    api_host: String,

    /// Send one out of every N events
    #[arg(long = "sample_rate", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    sample_rate: u32,

    /// Number of concurrent transmission workers; also sizes the retry
    /// queue to twice this value
    #[arg(long = "num_senders", default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    num_senders: u16,

    /// Field to remove from every event (repeatable)
    #[arg(long = "drop_field", value_name = "FIELD")]
    drop_fields: Vec<String>,

    /// Field whose value is replaced by its SHA-256 (repeatable)
    #[arg(long = "scrub_field", value_name = "FIELD")]
    scrub_fields: Vec<String>,

    /// key=value pair added to every event (repeatable)
    #[arg(long = "add_field", value_name = "KEY=VALUE")]
    add_fields: Vec<String>,

    /// Re-send events rejected with HTTP 429 or 500 after a short delay
    #[arg(long = "backoff")]
    backoff: bool,

    /// Seconds between response-stats reports; 0 disables reporting
    #[arg(long = "status_interval", default_value_t = 60)]
    status_interval: u64,

    /// Where tailing starts for each file
    #[arg(long = "tail.read_from", value_enum, default_value = "end")]
    read_from: ReadFrom,

    /// Stop when the end of every file is reached instead of following
    #[arg(long = "tail.stop")]
    stop: bool,

    /// Verbose diagnostic output
    #[arg(long = "debug")]
    debug: bool,
}

/// Immutable configuration used by the agent runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub files: Vec<PathBuf>,
    pub parser_name: ParserName,
    pub write_key: String,
    pub dataset: String,
    pub api_host: String,
    pub sample_rate: u32,
    pub num_senders: usize,
    pub drop_fields: Vec<String>,
    pub scrub_fields: Vec<String>,
    pub add_fields: Vec<AddField>,
    pub backoff: bool,
    pub status_interval: u64,
    pub read_from: ReadFrom,
    pub stop: bool,
    pub debug: bool,
}

impl Config {
    /// Parses the process arguments. Exits the process with a usage
    /// message on clap-level errors; returns `Err` for semantic ones.
    pub fn parse() -> Result<Config, AgentError> {
        Config::from_args(Args::parse())
    }

    /// Parses from an explicit argument list (used by tests).
    pub fn parse_from<I, T>(iter: I) -> Result<Config, AgentError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let args = Args::try_parse_from(iter)
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        Config::from_args(args)
    }

    fn from_args(args: Args) -> Result<Config, AgentError> {
        let add_fields = args
            .add_fields
            .iter()
            .map(|raw| AddField::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            files: args.files,
            parser_name: args.parser_name,
            write_key: args.write_key,
            dataset: args.dataset,
            api_host: args.api_host,
            sample_rate: args.sample_rate,
            num_senders: usize::from(args.num_senders),
            drop_fields: args.drop_fields,
            scrub_fields: args.scrub_fields,
            add_fields,
            backoff: args.backoff,
            status_interval: args.status_interval,
            read_from: args.read_from,
            stop: args.stop,
            debug: args.debug,
        })
    }

    /// Capacity of the retry queue feeding the sender.
    pub fn retry_capacity(&self) -> usize {
        2 * self.num_senders
    }
}
