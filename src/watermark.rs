//! Event-time watermark tracking.
//!
//! The watermark says that no more events older than it are expected. It is derived from the
//! largest event timestamp seen so far minus the allowed lateness, can be pushed forward by an
//! idle timeout when input stalls, and never moves backwards.

use crate::config::duration_millis;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    current: i64,
    max_event_time: Option<i64>,
    allowed_lateness: i64,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            current: i64::MIN,
            max_event_time: None,
            allowed_lateness: duration_millis(allowed_lateness),
        }
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn max_event_time(&self) -> Option<i64> {
        self.max_event_time
    }

    /// Records an event timestamp. Returns the new watermark if it moved.
    pub fn on_event(&mut self, timestamp: i64) -> Option<i64> {
        let max = self.max_event_time.map_or(timestamp, |m| m.max(timestamp));
        self.max_event_time = Some(max);
        self.advance(timestamp.saturating_sub(self.allowed_lateness))
    }

    /// Moves the watermark as if event time kept pace with the time spent idle.
    pub fn on_idle(&mut self, idle_for: Duration) -> Option<i64> {
        let max = self.max_event_time?;
        let candidate = max
            .saturating_add(duration_millis(idle_for))
            .saturating_sub(self.allowed_lateness);
        self.advance(candidate)
    }

    /// Jumps to the end of time; every window is complete afterwards.
    pub fn advance_to_end(&mut self) -> Option<i64> {
        self.advance(i64::MAX)
    }

    /// Whether a window ending at `window_end` is already complete.
    pub fn has_passed(&self, window_end: i64) -> bool {
        window_end <= self.current
    }

    fn advance(&mut self, candidate: i64) -> Option<i64> {
        if candidate > self.current {
            trace!(from = self.current, to = candidate, "watermark advanced");
            self.current = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}
