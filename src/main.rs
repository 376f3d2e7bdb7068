//! Command-line runner for the windowed word count.
//!
//! Reads messages from a file or standard input (`--input-topic -`), counts words per fixed
//! window and writes one file set per closed window under `--output-prefix`. SIGINT and
//! SIGTERM stop ingestion and flush every open window before exiting.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use windowed_wordcount::{
    ConfigError, LateDataPolicy, LineSource, PipelineConfig, PipelineError, RetryPolicy,
    ShutdownHandle, WordCountPipeline,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Count words over fixed event-time windows and write one output file per window
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Topic to read from: a file path, or - for standard input
    #[arg(long)]
    input_topic: Option<String>,

    /// Prefix of every output file
    #[arg(long)]
    output_prefix: Option<String>,

    /// Window length, e.g. 60s or 5m
    #[arg(long, value_parser = humantime::parse_duration)]
    window_length: Option<Duration>,

    /// Output files per window
    #[arg(long)]
    num_shards: Option<usize>,

    /// How far the watermark trails the newest event time
    #[arg(long, value_parser = humantime::parse_duration)]
    allowed_lateness: Option<Duration>,

    /// Wait without input before the watermark advances on its own
    #[arg(long, value_parser = humantime::parse_duration)]
    idle_timeout: Option<Duration>,

    /// Re-aggregate late events for windows closed within this horizon instead of dropping them
    #[arg(long, value_parser = humantime::parse_duration)]
    late_refire_horizon: Option<Duration>,

    /// Attempts per output file write before the window is held for the next flush
    #[arg(long)]
    sink_retry_attempts: Option<u32>,

    /// First delay between output write attempts
    #[arg(long, value_parser = humantime::parse_duration)]
    sink_retry_initial_backoff: Option<Duration>,

    /// Cap on the delay between output write attempts
    #[arg(long, value_parser = humantime::parse_duration)]
    sink_retry_max_backoff: Option<Duration>,

    /// Subscribe attempts, and consecutive broken streams, tolerated by ingestion
    #[arg(long)]
    source_retry_attempts: Option<u32>,

    /// First delay between subscribe attempts
    #[arg(long, value_parser = humantime::parse_duration)]
    source_retry_initial_backoff: Option<Duration>,

    /// Cap on the delay between subscribe attempts
    #[arg(long, value_parser = humantime::parse_duration)]
    source_retry_max_backoff: Option<Duration>,

    /// Failed flush cycles tolerated for one window before exiting with an error
    #[arg(long)]
    max_flush_cycles: Option<u32>,

    /// How often metrics are logged
    #[arg(long, value_parser = humantime::parse_duration)]
    metrics_interval: Option<Duration>,

    /// Messages buffered between ingestion and counting
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::new(
                self.input_topic
                    .clone()
                    .ok_or(ConfigError::MissingField("input_topic"))?,
                self.output_prefix
                    .clone()
                    .ok_or(ConfigError::MissingField("output_prefix"))?,
            ),
        };

        if let Some(topic) = self.input_topic {
            config.input_topic = topic;
        }
        if let Some(prefix) = self.output_prefix {
            config.output_prefix = prefix;
        }
        if let Some(window_length) = self.window_length {
            config.window_length = window_length;
        }
        if let Some(num_shards) = self.num_shards {
            config.num_shards = num_shards;
        }
        if let Some(allowed_lateness) = self.allowed_lateness {
            config.allowed_lateness = allowed_lateness;
        }
        if let Some(idle_timeout) = self.idle_timeout {
            config.idle_timeout = idle_timeout;
        }
        if let Some(horizon) = self.late_refire_horizon {
            config.late_data = LateDataPolicy::Refire { horizon };
        }
        override_retry(
            &mut config.sink_retry,
            self.sink_retry_attempts,
            self.sink_retry_initial_backoff,
            self.sink_retry_max_backoff,
        );
        override_retry(
            &mut config.source_retry,
            self.source_retry_attempts,
            self.source_retry_initial_backoff,
            self.source_retry_max_backoff,
        );
        if let Some(cycles) = self.max_flush_cycles {
            config.max_flush_cycles = cycles;
        }
        if let Some(interval) = self.metrics_interval {
            config.metrics_interval = interval;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }
}

fn override_retry(
    retry: &mut RetryPolicy,
    attempts: Option<u32>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
) {
    if let Some(attempts) = attempts {
        retry.max_attempts = attempts;
    }
    if let Some(backoff) = initial_backoff {
        retry.initial_backoff = backoff;
    }
    if let Some(backoff) = max_backoff {
        retry.max_backoff = backoff;
    }
}

/// Routes SIGINT and SIGTERM to the pipeline's shutdown handle.
fn install_signal_handler(handle: ShutdownHandle) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if handle.is_shutdown() {
            warn!("shutdown already in progress");
        } else {
            info!("signal received, flushing open windows");
            handle.shutdown();
        }
    })
}

fn run(args: Args) -> Result<(), CliError> {
    let config = args.into_config().map_err(PipelineError::from)?;
    let pipeline = WordCountPipeline::new(config)?;
    install_signal_handler(pipeline.shutdown_handle())?;
    let summary = pipeline.run(LineSource::new())?;

    info!(
        files = summary.files.len(),
        windows = summary.metrics.windows_emitted,
        empty_lines = summary.metrics.empty_lines,
        dropped_late_events = summary.metrics.dropped_late_events,
        "pipeline finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("windowed_wordcount={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pipeline failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn parse(flags: &[&str]) -> Args {
        let argv = ["windowed-wordcount", "--input-topic", "-", "--output-prefix", "out/wc"];
        Args::try_parse_from(argv.iter().chain(flags)).unwrap()
    }

    #[test]
    fn test_flags_cover_every_option() {
        let config = parse(&[
            "--window-length",
            "5m",
            "--num-shards",
            "3",
            "--allowed-lateness",
            "10s",
            "--idle-timeout",
            "2s",
            "--late-refire-horizon",
            "1h",
            "--sink-retry-attempts",
            "7",
            "--sink-retry-initial-backoff",
            "20ms",
            "--sink-retry-max-backoff",
            "1s",
            "--source-retry-attempts",
            "9",
            "--source-retry-initial-backoff",
            "50ms",
            "--source-retry-max-backoff",
            "30s",
            "--max-flush-cycles",
            "11",
            "--metrics-interval",
            "15s",
            "--channel-capacity",
            "64",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.input_topic, "-");
        assert_eq!(config.window_length, Duration::from_secs(300));
        assert_eq!(config.num_shards, 3);
        assert_eq!(config.allowed_lateness, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(2));
        assert_eq!(
            config.late_data,
            LateDataPolicy::Refire {
                horizon: Duration::from_secs(3600)
            }
        );
        assert_eq!(
            config.sink_retry,
            RetryPolicy {
                max_attempts: 7,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_secs(1),
            }
        );
        assert_eq!(
            config.source_retry,
            RetryPolicy {
                max_attempts: 9,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_secs(30),
            }
        );
        assert_eq!(config.max_flush_cycles, 11);
        assert_eq!(config.metrics_interval, Duration::from_secs(15));
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_unset_flags_keep_defaults() {
        let config = parse(&["--sink-retry-attempts", "1"]).into_config().unwrap();
        let defaults = PipelineConfig::new("-", "out/wc");

        assert_eq!(config.sink_retry.max_attempts, 1);
        assert_eq!(config.sink_retry.max_backoff, defaults.sink_retry.max_backoff);
        assert_eq!(config.source_retry, defaults.source_retry);
        assert_eq!(config.channel_capacity, defaults.channel_capacity);
    }

    #[test]
    fn test_flag_values_are_validated() {
        let result = parse(&["--channel-capacity", "0"]).into_config();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_sigint_requests_shutdown() {
        let handle = ShutdownHandle::new();
        install_signal_handler(handle.clone()).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_shutdown() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_shutdown());
    }
}
