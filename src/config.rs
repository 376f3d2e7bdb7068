//! Pipeline configuration.
//!
//! Options can come from a TOML file, from CLI flags, or both (flags win). Durations use
//! humantime notation (`60s`, `500ms`, `1m 30s`).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What happens to an event whose window already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LateDataPolicy {
    /// Drop the event and count it in `dropped_late_events`.
    #[default]
    Drop,
    /// Open a late pane for windows that closed no more than `horizon` ago.
    Refire {
        #[serde(with = "humantime_serde")]
        horizon: Duration,
    },
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Full configuration of a word-count pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Topic handed to the ingestion source.
    pub input_topic: String,
    /// Prefix of every output file; may include directories.
    pub output_prefix: String,
    #[serde(with = "humantime_serde", default = "default_window_length")]
    pub window_length: Duration,
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,
    #[serde(with = "humantime_serde", default)]
    pub allowed_lateness: Duration,
    /// How long the loop waits for input before advancing the watermark on its own.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    #[serde(default)]
    pub late_data: LateDataPolicy,
    #[serde(default)]
    pub sink_retry: RetryPolicy,
    #[serde(default)]
    pub source_retry: RetryPolicy,
    /// Failed flush cycles tolerated for one window before the pipeline gives up.
    #[serde(default = "default_max_flush_cycles")]
    pub max_flush_cycles: u32,
    #[serde(with = "humantime_serde", default = "default_metrics_interval")]
    pub metrics_interval: Duration,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_window_length() -> Duration {
    Duration::from_secs(60)
}

fn default_num_shards() -> usize {
    1
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_flush_cycles() -> u32 {
    5
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_channel_capacity() -> usize {
    1024
}

impl PipelineConfig {
    /// Config with every optional setting at its default.
    pub fn new(input_topic: impl Into<String>, output_prefix: impl Into<String>) -> Self {
        Self {
            input_topic: input_topic.into(),
            output_prefix: output_prefix.into(),
            window_length: default_window_length(),
            num_shards: default_num_shards(),
            allowed_lateness: Duration::ZERO,
            idle_timeout: default_idle_timeout(),
            late_data: LateDataPolicy::default(),
            sink_retry: RetryPolicy::default(),
            source_retry: RetryPolicy::default(),
            max_flush_cycles: default_max_flush_cycles(),
            metrics_interval: default_metrics_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_topic.trim().is_empty() {
            return Err(ConfigError::MissingField("input_topic"));
        }
        if self.output_prefix.trim().is_empty() {
            return Err(ConfigError::MissingField("output_prefix"));
        }
        if self.window_length.as_millis() == 0 {
            return Err(ConfigError::InvalidWindowLength(self.window_length));
        }
        if self.num_shards == 0 {
            return Err(ConfigError::InvalidShardCount(self.num_shards));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "idle_timeout",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channel_capacity",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_flush_cycles == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_flush_cycles",
                reason: "must be greater than 0".to_string(),
            });
        }
        for (field, retry) in [
            ("sink_retry.max_attempts", &self.sink_retry),
            ("source_retry.max_attempts", &self.source_retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
