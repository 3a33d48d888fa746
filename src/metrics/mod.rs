mod sampler;
mod stats;
mod types;

pub use sampler::{build_batch, Sampler, POLL_COUNT, RANDOM_VALUE};
pub use stats::{
    CountingAllocator, Extractor, HeapCounters, ProcessCounters, ProcessStats, RuntimeStats,
    StatsSource, GAUGES,
};
pub use types::{Batch, MetricKind, MetricRecord};
