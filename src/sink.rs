//! Per-window file output.
//!
//! Each closed window pane is written to `num_shards` new files named after the output
//! prefix, the window bounds and the shard index, for example
//! `out/wc-20240101T120000.000Z-20240101T120100.000Z-00000-of-00001`. Files are created with
//! create-new semantics so an earlier window's output is never overwritten.

use crate::config::RetryPolicy;
use crate::error::SinkError;
use crate::formatter::format_word_count;
use crate::metrics::PipelineMetrics;
use crate::window_instance::Window;
use crate::windowing::WindowSnapshot;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// A closed window waiting to be written, with the shards already on disk.
#[derive(Debug, Clone)]
pub struct PendingWindow {
    pub snapshot: WindowSnapshot,
    written: Vec<Option<PathBuf>>,
    pub failed_cycles: u32,
}

impl PendingWindow {
    pub fn new(snapshot: WindowSnapshot, num_shards: usize) -> Self {
        Self {
            snapshot,
            written: vec![None; num_shards],
            failed_cycles: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.written.iter().all(Option::is_some)
    }

    pub fn written_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.written.iter().flatten()
    }
}

#[derive(Debug, Clone)]
pub struct FileSink {
    output_prefix: String,
    num_shards: usize,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl FileSink {
    pub fn new(
        output_prefix: impl Into<String>,
        num_shards: usize,
        retry: RetryPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            output_prefix: output_prefix.into(),
            num_shards: num_shards.max(1),
            retry,
            metrics,
        }
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Output path of one shard of one window pane.
    pub fn shard_path(&self, window: &Window, pane: u32, shard: usize) -> PathBuf {
        let pane = if pane > 0 {
            format!("-pane-{}", pane)
        } else {
            String::new()
        };
        PathBuf::from(format!(
            "{}-{}-{}{}-{:05}-of-{:05}",
            self.output_prefix,
            format_instant(window.start),
            format_instant(window.end),
            pane,
            shard,
            self.num_shards
        ))
    }

    /// Formatted lines per shard: sorted by word, then dealt round-robin.
    pub fn partition(&self, snapshot: &WindowSnapshot) -> Vec<Vec<String>> {
        let mut shards = vec![Vec::new(); self.num_shards];
        for (i, record) in snapshot.records().iter().enumerate() {
            shards[i % self.num_shards].push(format_word_count(&record.word, record.count));
        }
        shards
    }

    /// Writes every shard of `pending` that is not on disk yet.
    ///
    /// Each shard gets `retry.max_attempts` tries. On error the shards written so far stay
    /// recorded in `pending`, so the next call only retries what is missing.
    pub fn write_window(&self, pending: &mut PendingWindow) -> Result<(), SinkError> {
        if pending.written.len() != self.num_shards {
            pending.written.resize(self.num_shards, None);
        }
        let shards = self.partition(&pending.snapshot);
        let window = pending.snapshot.window;
        let pane = pending.snapshot.pane;

        for (shard, lines) in shards.iter().enumerate() {
            if pending.written[shard].is_some() {
                continue;
            }
            let path = self.shard_path(&window, pane, shard);
            self.write_with_retry(&path, lines)?;
            debug!(path = %path.display(), lines = lines.len(), "wrote window shard");
            self.metrics.record_file_written();
            pending.written[shard] = Some(path);
        }
        Ok(())
    }

    fn write_with_retry(&self, path: &Path, lines: &[String]) -> Result<(), SinkError> {
        let mut attempt = 1;
        loop {
            match write_lines(path, lines) {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() || attempt >= self.retry.max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        path = %path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "window write failed, retrying"
                    );
                    self.metrics.record_sink_retry();
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(SinkError::AlreadyExists(path.to_path_buf()));
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut writer = BufWriter::new(file);
    if let Err(e) = write_all_lines(&mut writer, lines) {
        // Remove the partial file so a retry can create it again.
        drop(writer);
        let _ = fs::remove_file(path);
        return Err(io_err(e));
    }
    Ok(())
}

fn write_all_lines(writer: &mut impl Write, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}

/// UTC instant as `YYYYMMDDTHHMMSS.mmmZ`, or the raw milliseconds when out of range.
fn format_instant(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(instant) => instant.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
        None => millis.to_string(),
    }
}
