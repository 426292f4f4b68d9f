//! Log relay: fans an environment's output stream out to the operational
//! log and to a durable per-job log file.
//!
//! The file receives every chunk verbatim and in order, opened in append
//! mode so a re-attached relay never loses earlier content. The operational
//! log receives one event per complete line, tagged with the build id.
//! The two sinks are independent: losing the file never stops the stream
//! from reaching the operational log.

use std::io;
use std::path::PathBuf;

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::backend::BackendError;
use crate::job::BuildId;

/// Longest partial line held back waiting for a newline.
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Totals for one relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes: u64,
    pub lines: u64,
}

/// The log file failed; the stream was still drained to the operational log.
#[derive(Debug, Error)]
#[error("failed to write build log: {source}")]
pub struct LogFileError {
    /// What was relayed before the stream ended.
    pub stats: RelayStats,
    #[source]
    pub source: io::Error,
}

pub struct LogRelay {
    build_id: BuildId,
    log_path: PathBuf,
}

impl LogRelay {
    pub fn new(build_id: BuildId, log_path: impl Into<PathBuf>) -> Self {
        Self {
            build_id,
            log_path: log_path.into(),
        }
    }

    /// Consume `stream` until it ends, writing to both sinks.
    ///
    /// A stream error ends the relay early; everything received up to that
    /// point is kept. A log file failure is reported only after the stream
    /// has been fully consumed.
    pub async fn run<S>(self, mut stream: S) -> Result<RelayStats, LogFileError>
    where
        S: Stream<Item = Result<Vec<u8>, BackendError>> + Unpin,
    {
        let mut stats = RelayStats::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut file_error = None;
        let mut file = match self.open().await {
            Ok(file) => Some(file),
            Err(e) => {
                self.file_failed(&e);
                file_error = Some(e);
                None
            }
        };

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(build_id = %self.build_id, error = %e, "Output stream failed");
                    break;
                }
            };
            let write_failed = match file.as_mut() {
                Some(f) => f.write_all(&chunk).await.err(),
                None => None,
            };
            if let Some(e) = write_failed {
                self.file_failed(&e);
                file = None;
                file_error = Some(e);
            }
            stats.bytes += chunk.len() as u64;

            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                self.emit(&line[..line.len() - 1]);
                stats.lines += 1;
            }
            if pending.len() >= MAX_PENDING_LINE {
                self.emit(&pending);
                pending.clear();
                stats.lines += 1;
            }
        }

        if !pending.is_empty() {
            self.emit(&pending);
            stats.lines += 1;
        }

        if let Some(mut f) = file {
            if let Err(e) = close(&mut f).await {
                self.file_failed(&e);
                file_error = Some(e);
            }
        }
        debug!(build_id = %self.build_id, bytes = stats.bytes, lines = stats.lines, "Output stream ended");

        match file_error {
            Some(source) => Err(LogFileError { stats, source }),
            None => Ok(stats),
        }
    }

    async fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
    }

    fn file_failed(&self, error: &io::Error) {
        warn!(
            build_id = %self.build_id,
            path = %self.log_path.display(),
            error = %error,
            "Build log file unavailable, relaying to operational log only"
        );
    }

    fn emit(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        info!(target: "build_output", build_id = %self.build_id, "{text}");
    }
}

async fn close(file: &mut File) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}
