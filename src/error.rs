//! Error types for the word-count pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    MissingField(&'static str),

    #[error("invalid window length: {0:?}, must be at least 1ms")]
    InvalidWindowLength(std::time::Duration),

    #[error("invalid shard count: {0}, must be greater than 0")]
    InvalidShardCount(usize),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failures reported by an ingestion source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to subscribe to topic {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gave up on topic {topic} after {attempts} attempts: {last}")]
    Exhausted {
        topic: String,
        attempts: u32,
        last: String,
    },
}

/// Failures while writing window output.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("refusing to overwrite existing output file {0}")]
    AlreadyExists(PathBuf),

    #[error("window [{start}, {end}) still unwritten after {cycles} flush cycles: {last}")]
    Exhausted {
        start: i64,
        end: i64,
        cycles: u32,
        last: String,
    },
}

impl SinkError {
    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Io { .. })
    }
}

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("ingestion error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("ingestion worker panicked")]
    WorkerPanicked,
}
