//! Rotation-following file tailer.
//!
//! One task per configured path reads from the file's tail and feeds a
//! single bounded channel of [`RawLine`]s, so downstream stages see one
//! logical sequence. Rotation handling is syslog-style: the path is
//! re-stat'ed every poll cycle and a changed file identity means the file
//! was replaced underneath us.
//!
//! Per poll cycle:
//! - path absent → *searching*: poll with the base interval, backing off
//!   up to [`SEARCH_INTERVAL_MAX`]; after [`SEARCH_GRACE`] without a
//!   successor the per-file state is dropped.
//! - new identity → reopen at offset 0. Lines still unread in the
//!   predecessor are abandoned (best effort).
//! - same identity, shrunk → truncation, restart at offset 0.
//! - otherwise → read to EOF, split on newline, buffer the trailing
//!   partial line.
//!
//! Within one file, line order is preserved; across files the interleaving
//! is unspecified. Only open failures at startup are fatal; everything at
//! runtime is logged and retried.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ReadFrom;
use crate::error::AgentError;
use crate::LINE_CHANNEL_CAPACITY;

/// Base poll / searching interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound the searching interval backs off to while a path is absent.
pub const SEARCH_INTERVAL_MAX: Duration = Duration::from_secs(2);

/// How long a vanished file may stay absent before its tail state is
/// dropped and any successor at the path is treated as brand new.
pub const SEARCH_GRACE: Duration = Duration::from_secs(60);

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// One text line read from a tailed file, newline stripped.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub line: String,
    pub path: Arc<PathBuf>,
}

/// Tailer behavior knobs.
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub read_from: ReadFrom,
    /// Stop each file task at EOF instead of following.
    pub stop: bool,
    pub poll_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        TailOptions {
            read_from: ReadFrom::End,
            stop: false,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Identity of an open file, used to detect rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> FileId {
    use std::os::unix::fs::MetadataExt;
    FileId {
        dev: meta.dev(),
        ino: meta.ino(),
    }
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> FileId {
    // Without inodes, rotation is only observable as truncation.
    FileId { dev: 0, ino: 0 }
}

/// Per-file read position. The offset is monotone within one file
/// identity and resets to 0 on rotation or truncation.
struct TailState {
    file: File,
    id: FileId,
    offset: u64,
    /// Bytes after the last newline, carried into the next read.
    partial: Vec<u8>,
}

/// Opens every path and spawns one follower task per file.
///
/// Returns the shared line channel; it closes once every follower exits
/// (which, without `stop`, is only when the receiver goes away). Any open
/// failure here is fatal.
pub async fn start(
    paths: &[PathBuf],
    options: TailOptions,
) -> Result<(Receiver<RawLine>, Vec<JoinHandle<()>>), AgentError> {
    let (tx, rx) = mpsc::channel::<RawLine>(LINE_CHANNEL_CAPACITY);

    let mut handles = Vec::with_capacity(paths.len());
    for path in paths {
        let state = open_initial(path, options.read_from).await?;
        let task_path = Arc::new(path.clone());
        let task_options = options.clone();
        let task_tx = tx.clone();
        handles.push(tokio::spawn(async move {
            follow(task_path, state, task_options, task_tx).await;
        }));
    }

    Ok((rx, handles))
}

async fn open_initial(path: &PathBuf, read_from: ReadFrom) -> Result<TailState, AgentError> {
    let mut file = File::open(path).await.map_err(|source| AgentError::TailOpen {
        path: path.clone(),
        source,
    })?;
    let meta = file.metadata().await.map_err(|source| AgentError::TailOpen {
        path: path.clone(),
        source,
    })?;

    let offset = match read_from {
        ReadFrom::Beginning => 0,
        // No persisted cursor, so `last` anchors at the end like `end`.
        ReadFrom::End | ReadFrom::Last => {
            file.seek(SeekFrom::End(0))
                .await
                .map_err(|source| AgentError::TailOpen {
                    path: path.clone(),
                    source,
                })?
        }
    };

    info!(path = %path.display(), offset, "tailing file");

    Ok(TailState {
        file,
        id: file_id(&meta),
        offset,
        partial: Vec::new(),
    })
}

/// Follows a single path until the receiver goes away or, with `stop`,
/// until EOF is reached with no rotation pending.
async fn follow(path: Arc<PathBuf>, state: TailState, options: TailOptions, tx: Sender<RawLine>) {
    let mut state = Some(state);
    let mut search_interval = options.poll_interval;
    let mut missing_since: Option<Instant> = None;

    loop {
        let meta = match tokio::fs::metadata(path.as_ref()).await {
            Ok(meta) => meta,
            Err(err) => {
                if missing_since.is_none() {
                    info!(path = %path.display(), error = %err, "file vanished; searching");
                    missing_since = Some(Instant::now());
                }
                let waited = missing_since.map(|t| t.elapsed()).unwrap_or_default();
                if waited > SEARCH_GRACE {
                    if state.take().is_some() {
                        debug!(path = %path.display(), "no successor within grace window; dropping tail state");
                    }
                    if options.stop {
                        return;
                    }
                }
                sleep(search_interval).await;
                search_interval = (search_interval * 2).min(SEARCH_INTERVAL_MAX);
                continue;
            }
        };
        missing_since = None;
        search_interval = options.poll_interval;

        let id = file_id(&meta);
        let rotated = !matches!(&state, Some(st) if st.id == id);
        if rotated {
            match File::open(path.as_ref()).await {
                Ok(file) => {
                    if state.is_some() {
                        info!(path = %path.display(), "rotation detected; reopening at offset 0");
                    }
                    state = Some(TailState {
                        file,
                        id,
                        offset: 0,
                        partial: Vec::new(),
                    });
                }
                Err(err) => {
                    // Lost the race against another rename; try next cycle.
                    debug!(path = %path.display(), error = %err, "open failed after rotation; retrying");
                    sleep(options.poll_interval).await;
                    continue;
                }
            }
        }

        let st = state.as_mut().expect("state present after open");
        if meta.len() < st.offset {
            info!(
                path = %path.display(),
                offset = st.offset,
                len = meta.len(),
                "file truncated; restarting at offset 0"
            );
            st.offset = 0;
            st.partial.clear();
        }

        match read_to_eof(st, &path, &tx).await {
            Ok(true) => {}
            // Receiver dropped: the pipeline is gone, nothing left to feed.
            Ok(false) => return,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "transient read error");
                sleep(options.poll_interval).await;
                continue;
            }
        }

        if options.stop {
            flush_partial(st, &path, &tx).await;
            debug!(path = %path.display(), "reached end of file; stopping");
            return;
        }

        sleep(options.poll_interval).await;
    }
}

/// Reads from the current offset to EOF in chunks, emitting whole lines as
/// they complete. Returns `Ok(false)` once the receiver is gone. Reading
/// in chunks keeps the buffered text bounded: when the channel is full the
/// send blocks and the next chunk is simply not read yet.
async fn read_to_eof(
    st: &mut TailState,
    path: &Arc<PathBuf>,
    tx: &Sender<RawLine>,
) -> std::io::Result<bool> {
    st.file.seek(SeekFrom::Start(st.offset)).await?;

    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = st.file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(true);
        }
        st.offset += n as u64;
        st.partial.extend_from_slice(&chunk[..n]);

        while let Some(pos) = st.partial.iter().position(|&b| b == b'\n') {
            let mut line_bytes: Vec<u8> = st.partial.drain(..=pos).collect();
            line_bytes.pop(); // the newline itself
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.pop();
            }
            let raw = RawLine {
                line: String::from_utf8_lossy(&line_bytes).into_owned(),
                path: Arc::clone(path),
            };
            if tx.send(raw).await.is_err() {
                return Ok(false);
            }
        }
    }
}

/// In `stop` mode a final line without a trailing newline is still a line.
async fn flush_partial(st: &mut TailState, path: &Arc<PathBuf>, tx: &Sender<RawLine>) {
    if st.partial.is_empty() {
        return;
    }
    let raw = RawLine {
        line: String::from_utf8_lossy(&st.partial).into_owned(),
        path: Arc::clone(path),
    };
    st.partial.clear();
    let _ = tx.send(raw).await;
}
