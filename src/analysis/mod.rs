//! Progressive analysis
//!
//! The task model, the focus-aware priority policy, the scheduler that drains
//! the backlog, and the project orchestrator built on top of it.

pub mod focus;
pub mod priority;
pub mod project;
pub mod report;
pub mod scheduler;
pub mod task;

pub use focus::{EditorContext, EditorState, Headless};
pub use priority::PriorityPolicy;
pub use project::{DigestAnalyzer, FileAnalyzer, FileDigest, ProjectAnalyzer};
pub use report::PerformanceReport;
pub use scheduler::{FailedTask, ProcessingOptions, ProgressiveAnalyzer, MAX_RETRIES, RETRY_PENALTY};
pub use task::{AnalysisProgress, AnalysisTask, TaskKind, TaskStatus};
