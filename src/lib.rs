mod config;
mod engine;
mod error;
mod formatter;
mod message;
mod metrics;
mod sink;
mod source;
mod tokenizer;
mod watermark;
mod window_instance;
mod windowing;

pub use config::{LateDataPolicy, PipelineConfig, RetryPolicy};
pub use engine::{PipelineSummary, ShutdownHandle, WordCountPipeline};
pub use error::{ConfigError, PipelineError, SinkError, SourceError};
pub use formatter::{OutputRecord, format_word_count};
pub use message::{Message, WordEvent};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use sink::{FileSink, PendingWindow};
pub use source::{IngestionSource, LineSource, MemorySource, MessageStream, parse_line, subscribe_with_retry};
pub use tokenizer::{TOKENIZER_PATTERN, Tokenizer};
pub use watermark::WatermarkTracker;
pub use window_instance::{Window, WindowAssigner};
pub use windowing::{AddOutcome, WindowCallback, WindowSnapshot, WindowedAggregator};
