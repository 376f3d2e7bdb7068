//! Process-wide pipeline counters.
//!
//! A single `PipelineMetrics` is created when the pipeline starts and shared by `Arc` with
//! every stage. Counters only grow; they are read through [`PipelineMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    messages_received: AtomicU64,
    empty_lines: AtomicU64,
    words_accepted: AtomicU64,
    dropped_late_events: AtomicU64,
    late_events_refired: AtomicU64,
    windows_emitted: AtomicU64,
    files_written: AtomicU64,
    sink_write_retries: AtomicU64,
    source_reconnects: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub empty_lines: u64,
    pub words_accepted: u64,
    pub dropped_late_events: u64,
    pub late_events_refired: u64,
    pub windows_emitted: u64,
    pub files_written: u64,
    pub sink_write_retries: u64,
    pub source_reconnects: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_line(&self) {
        self.empty_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_word_accepted(&self) {
        self.words_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_late(&self) {
        self.dropped_late_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_refired(&self) {
        self.late_events_refired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_emitted(&self) {
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_written(&self) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_retry(&self) {
        self.sink_write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_reconnect(&self) {
        self.source_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn empty_lines(&self) -> u64 {
        self.empty_lines.load(Ordering::Relaxed)
    }

    pub fn dropped_late_events(&self) -> u64 {
        self.dropped_late_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            empty_lines: self.empty_lines.load(Ordering::Relaxed),
            words_accepted: self.words_accepted.load(Ordering::Relaxed),
            dropped_late_events: self.dropped_late_events.load(Ordering::Relaxed),
            late_events_refired: self.late_events_refired.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            sink_write_retries: self.sink_write_retries.load(Ordering::Relaxed),
            source_reconnects: self.source_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Writes the current counters as one structured log line.
    pub fn export(&self) {
        let s = self.snapshot();
        info!(
            messages_received = s.messages_received,
            empty_lines = s.empty_lines,
            words_accepted = s.words_accepted,
            dropped_late_events = s.dropped_late_events,
            late_events_refired = s.late_events_refired,
            windows_emitted = s.windows_emitted,
            files_written = s.files_written,
            sink_write_retries = s.sink_write_retries,
            source_reconnects = s.source_reconnects,
            "pipeline metrics"
        );
    }
}
