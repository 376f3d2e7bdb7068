mod pipeline;

pub use pipeline::{PipelineSummary, ShutdownHandle, WordCountPipeline};
