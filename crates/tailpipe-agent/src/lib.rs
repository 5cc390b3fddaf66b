//! tailpipe: follow append-only log files, extract structured events, and
//! forward them to a remote ingestion endpoint over HTTP.
//!
//! The crate is organized as a staged pipeline connected by bounded
//! channels:
//!
//! ```text
//!   ┌────────┐    ┌────────┐    ┌──────────┐    ┌────────┐
//!   │ Tailer │───>│ Parser │───>│ Mutators │───>│ Sender │──> Transmission
//!   └────────┘    └────────┘    └──────────┘    └───┬────┘        │
//!                                                   ^             v
//!                                         retry +   │      ┌──────────────┐
//!                                         delay ────┴──────│ Resp handler │
//!                                                          └──────────────┘
//! ```
//!
//! Each stage closes its output when its input closes, so shutdown cascades
//! from the tailer all the way to the response handler without any shared
//! cancellation state.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod logger;
pub mod mutate;
pub mod parsers;
pub mod response;
pub mod sender;
pub mod tail;
pub mod transmission;

/// Capacity of the raw-line channel between the tailer and the parser.
pub const LINE_CHANNEL_CAPACITY: usize = 1000;

/// How long the sender idles when none of its inputs are ready, in ms.
pub const SENDER_IDLE_MS: u64 = 100;

/// Back-off published on the delay channel for a retryable response, in ms.
pub const BACKOFF_DELAY_MS: u64 = 100;
