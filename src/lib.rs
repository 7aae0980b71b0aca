//! djanalyze: progressive, priority-driven analysis of Django projects
//!
//! Files are queued with a priority derived from their kind, editor focus and
//! size, then drained in bounded batches with a concurrency window, retrying
//! transient failures and caching results by content hash.

pub mod analysis;
pub mod errors;
pub mod frontend;
pub mod infrastructure;
pub mod performance;

pub use analysis::{
    AnalysisProgress, AnalysisTask, DigestAnalyzer, EditorContext, EditorState, FailedTask, FileAnalyzer,
    PerformanceReport, PriorityPolicy, ProcessingOptions, ProgressiveAnalyzer, ProjectAnalyzer, TaskKind, TaskStatus,
};
pub use errors::{BoxError, ConfigError, JobError, ProjectError};
pub use frontend::{cli_main, Config};
pub use infrastructure::concurrency::{DebouncedExecutor, EventBus, Job, PoolStatus, WorkerEvent, WorkerPool};
pub use infrastructure::logging::{init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogOutput};
pub use performance::{CacheStats, ContentCache, ContentHash, Profiler};
