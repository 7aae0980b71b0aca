//! Handler-dispatched background jobs
//!
//! Jobs carry a kind string; the pool looks up the handler registered for
//! that kind and awaits it on one of `workers` pull loops. The pending queue
//! is kept sorted by priority, highest first, equal priorities in arrival
//! order.

use super::events::EventBus;
use crate::errors::{BoxError, JobError};
use async_trait::async_trait;
use flume::Receiver;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Job<P> {
    pub id: String,
    pub kind: String,
    pub payload: P,
    pub priority: i64,
}

impl<P> Job<P> {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: P, priority: i64) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            priority,
        }
    }
}

#[async_trait]
pub trait JobHandler<P, R>: Send + Sync {
    async fn handle(&self, payload: P) -> Result<R, BoxError>;
}

/// Adapts an async closure into a [`JobHandler`]
struct FnHandler<F>(F);

#[async_trait]
impl<P, R, F, Fut> JobHandler<P, R> for FnHandler<F>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, BoxError>> + Send,
{
    async fn handle(&self, payload: P) -> Result<R, BoxError> {
        (self.0)(payload).await
    }
}

/// Outcome of one job. Success carries the result, failure the error, never both.
#[derive(Debug, Clone)]
pub enum WorkerEvent<R> {
    Completed { job_id: String, result: R, duration: Duration },
    Failed { job_id: String, error: JobError, duration: Duration },
}

impl<R> WorkerEvent<R> {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id, .. } | Self::Failed { job_id, .. } => job_id,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Completed { duration, .. } | Self::Failed { duration, .. } => *duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub queue_length: usize,
    pub active_tasks: usize,
    pub is_running: bool,
}

struct JobQueue<P> {
    pending: Vec<Job<P>>,
    active: usize,
}

struct Shared<P, R> {
    queue: Mutex<JobQueue<P>>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler<P, R>>>>,
    running: AtomicBool,
    /// Loops from an earlier start exit once this moves on
    generation: AtomicU64,
    wake: Notify,
    events: EventBus<WorkerEvent<R>>,
}

impl<P, R> Shared<P, R>
where
    P: Send + 'static,
    R: Clone + Send + 'static,
{
    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    fn take_next(&self) -> Option<Job<P>> {
        let mut queue = self.queue.lock();
        if queue.pending.is_empty() {
            return None;
        }
        let job = queue.pending.remove(0);
        queue.active += 1;
        Some(job)
    }

    async fn run(&self, job: Job<P>) {
        let handler = self.handlers.read().get(&job.kind).cloned();
        let started = Instant::now();

        let outcome = match handler {
            Some(handler) => handler.handle(job.payload).await.map_err(JobError::from),
            None => Err(JobError::NoHandler { kind: job.kind.clone() }),
        };
        let duration = started.elapsed();

        let event = match outcome {
            Ok(result) => {
                debug!(job = %job.id, kind = %job.kind, ?duration, "job completed");
                WorkerEvent::Completed { job_id: job.id, result, duration }
            }
            Err(error) => {
                warn!(job = %job.id, kind = %job.kind, error = %error, "job failed");
                WorkerEvent::Failed { job_id: job.id, error, duration }
            }
        };
        // Emit before releasing the slot so waiters observe the event
        self.events.emit(event);
        self.queue.lock().active -= 1;
    }

    async fn worker_loop(self: Arc<Self>, generation: u64) {
        while self.is_current(generation) {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register interest before checking the queue so a concurrent add is not missed
            notified.as_mut().enable();

            match self.take_next() {
                Some(job) => self.run(job).await,
                None => notified.await,
            }
        }
    }
}

pub struct WorkerPool<P, R> {
    shared: Arc<Shared<P, R>>,
    workers: usize,
    poll_interval: Duration,
}

impl<P, R> WorkerPool<P, R>
where
    P: Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new(workers: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(JobQueue {
                    pending: Vec::new(),
                    active: 0,
                }),
                handlers: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                wake: Notify::new(),
                events: EventBus::new(),
            }),
            workers: workers.max(1),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// How often [`wait_for_completion`](Self::wait_for_completion) re-checks
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn register_handler(&self, kind: impl Into<String>, handler: impl JobHandler<P, R> + 'static) {
        self.shared.handlers.write().insert(kind.into(), Arc::new(handler));
    }

    pub fn register_fn<F, Fut>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        self.register_handler(kind, FnHandler(handler));
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.shared.handlers.read().contains_key(kind)
    }

    pub fn subscribe(&self) -> Receiver<WorkerEvent<R>> {
        self.shared.events.subscribe()
    }

    pub fn add_task(&self, job: Job<P>) {
        {
            let mut queue = self.shared.queue.lock();
            queue.pending.push(job);
            queue.pending.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        self.shared.wake.notify_one();
    }

    /// Spawn the pull loops on the current runtime. No-op when already
    /// running; returns false outside a runtime.
    pub fn start(&self) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("worker pool started outside an async runtime");
                return false;
            }
        };

        if self.shared.running.swap(true, Ordering::AcqRel) {
            return true;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;

        for _ in 0..self.workers {
            runtime.spawn(Arc::clone(&self.shared).worker_loop(generation));
        }
        debug!(workers = self.workers, "worker pool started");
        true
    }

    /// Stop pulling new jobs. Jobs already dispatched run to completion.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.wake.notify_waiters();
            debug!("worker pool stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PoolStatus {
        let queue = self.shared.queue.lock();
        PoolStatus {
            queue_length: queue.pending.len(),
            active_tasks: queue.active,
            is_running: self.is_running(),
        }
    }

    /// Drop every job not yet dispatched, returning how many were dropped
    pub fn clear_queue(&self) -> usize {
        let mut queue = self.shared.queue.lock();
        let dropped = queue.pending.len();
        queue.pending.clear();
        dropped
    }

    /// Resolve once nothing is queued or in flight. Never resolves while a
    /// stopped pool still holds queued jobs.
    pub async fn wait_for_completion(&self) {
        loop {
            let status = self.status();
            if status.queue_length == 0 && status.active_tasks == 0 {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl<P, R> Drop for WorkerPool<P, R> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_waiters();
    }
}
