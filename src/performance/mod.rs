//! Timing instrumentation and the content-hash result cache

pub mod cache;
pub mod metrics;

pub use cache::{CacheStats, ContentCache, ContentHash, EstimateSize};
pub use metrics::{global_profiler, OperationSummary, ProfileRecord, Profiler, Timer};
