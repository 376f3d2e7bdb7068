use crate::config::duration_millis;
use crate::error::ConfigError;
use std::fmt;
use std::time::Duration;

// Representing a half-open event-time window [start, end) in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    pub fn is_same_window(&self, other: &Window) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// Assigns timestamps to fixed windows that tile the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAssigner {
    length: i64,
}

impl WindowAssigner {
    pub fn new(length: Duration) -> Result<Self, ConfigError> {
        let length_ms = duration_millis(length);
        if length_ms <= 0 {
            return Err(ConfigError::InvalidWindowLength(length));
        }
        Ok(Self { length: length_ms })
    }

    pub fn length_millis(&self) -> i64 {
        self.length
    }

    /// Window containing `timestamp`; floors toward negative infinity.
    pub fn assign(&self, timestamp: i64) -> Window {
        let start = timestamp.saturating_sub(timestamp.rem_euclid(self.length));
        Window::new(start, start.saturating_add(self.length))
    }
}
