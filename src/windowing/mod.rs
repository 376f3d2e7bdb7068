mod aggregator;

pub use aggregator::{AddOutcome, WindowCallback, WindowSnapshot, WindowedAggregator};
