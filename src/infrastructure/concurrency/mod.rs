//! Concurrency primitives
//!
//! - `events`: multi-subscriber event fan-out over flume channels
//! - `debounce`: keyed debouncing of bursty triggers
//! - `pool`: priority-ordered, handler-dispatched background jobs

pub mod debounce;
pub mod events;
pub mod pool;

pub use debounce::DebouncedExecutor;
pub use events::EventBus;
pub use pool::{Job, JobHandler, PoolStatus, WorkerEvent, WorkerPool};
