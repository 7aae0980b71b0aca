//! Progressive analysis scheduler
//!
//! Owns a priority-sorted backlog of [`AnalysisTask`]s and drains it in
//! bounded batches. Within a batch at most `concurrency` callbacks are awaited
//! at once; a freed slot is refilled immediately from the rest of the batch.
//! Failed tasks are retried with decaying priority up to [`MAX_RETRIES`]
//! attempts, after which they are recorded as permanently failed. Progress is
//! pushed to subscribers after every state transition.
//!
//! All bookkeeping happens under one mutex that is never held across an
//! `.await`; callbacks run interleaved inside the single drain future.

use super::focus::{EditorContext, Headless};
use super::priority::PriorityPolicy;
use super::task::{task_id, AnalysisProgress, AnalysisTask, TaskKind, TaskStatus};
use crate::errors::BoxError;
use crate::infrastructure::concurrency::EventBus;
use crate::performance::metrics::{metadata, OperationSummary, Profiler};
use flume::Receiver;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts before a task is considered permanently failed
pub const MAX_RETRIES: u32 = 3;

/// Priority subtracted from a task each time it fails
pub const RETRY_PENALTY: i64 = 10;

/// Drain loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    /// Yield between batches so the host stays responsive
    pub batch_pause: Duration,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            batch_pause: Duration::from_millis(100),
        }
    }
}

impl ProcessingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }
}

/// A task that exhausted its retries, with the last error it produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub task: AnalysisTask,
    pub error: String,
}

#[derive(Default)]
struct QueueState {
    backlog: Vec<AnalysisTask>,
    processing: HashMap<String, AnalysisTask>,
    completed: HashSet<String>,
    failed: HashMap<String, FailedTask>,
    /// Bumped by `clear()` so results of callbacks started before the reset are discarded
    session: u64,
}

impl QueueState {
    /// Stable: equal priorities keep insertion order
    fn sort(&mut self) {
        self.backlog.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn progress(&self) -> AnalysisProgress {
        AnalysisProgress::compute(
            self.backlog.len(),
            self.processing.len(),
            self.completed.len(),
            self.failed.len(),
        )
    }
}

/// Resets the running flag when the drain future completes or is dropped
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ProgressiveAnalyzer {
    state: Mutex<QueueState>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    policy: PriorityPolicy,
    editor: Arc<dyn EditorContext>,
    profiler: Arc<Profiler>,
    progress: EventBus<AnalysisProgress>,
    completions: EventBus<AnalysisTask>,
    failures: EventBus<FailedTask>,
}

impl ProgressiveAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            policy: PriorityPolicy::default(),
            editor: Arc::new(Headless),
            profiler: Arc::new(Profiler::new()),
            progress: EventBus::new(),
            completions: EventBus::new(),
            failures: EventBus::new(),
        }
    }

    pub fn with_editor(mut self, editor: Arc<dyn EditorContext>) -> Self {
        self.editor = editor;
        self
    }

    pub fn with_policy(mut self, policy: PriorityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    /// Progress snapshots, one per state transition
    pub fn subscribe_progress(&self) -> Receiver<AnalysisProgress> {
        self.progress.subscribe()
    }

    /// Tasks that finished successfully
    pub fn subscribe_completions(&self) -> Receiver<AnalysisTask> {
        self.completions.subscribe()
    }

    /// Tasks that exhausted their retries
    pub fn subscribe_failures(&self) -> Receiver<FailedTask> {
        self.failures.subscribe()
    }

    /// Queue files for analysis. Completed files are skipped; a file that is
    /// already pending keeps a single task at the higher of the two
    /// priorities; a file currently processing is skipped. Returns the number
    /// of new tasks.
    pub fn add_to_queue<I, P>(&self, files: I, kind: TaskKind, base_priority: i64) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        // Priorities may stat the file, so compute them before taking the lock
        let candidates: Vec<(PathBuf, i64)> = files
            .into_iter()
            .map(|file| {
                let path = file.as_ref();
                let priority = self.policy.compute(path, kind, base_priority, self.editor.as_ref());
                (path.to_path_buf(), priority)
            })
            .collect();

        let added = {
            let mut state = self.state.lock();
            let mut added = 0;

            for (path, priority) in candidates {
                let id = task_id(&path);
                if state.completed.contains(&id) || state.processing.contains_key(&id) {
                    continue;
                }

                if let Some(existing) = state.backlog.iter_mut().find(|t| t.id == id) {
                    existing.priority = existing.priority.max(priority);
                    continue;
                }

                // A fresh request supersedes an earlier permanent failure
                state.failed.remove(&id);
                state.backlog.push(AnalysisTask::new(path, kind, priority));
                added += 1;
            }

            state.sort();
            added
        };

        debug!(kind = %kind, added, "queued files");
        self.emit_progress();
        added
    }

    /// Boost a still-pending task. In-flight and finished work is never
    /// preempted, so this is a no-op for any other file.
    pub fn reprioritize_file(&self, path: &Path, boost: i64) -> bool {
        let id = task_id(path);
        let mut state = self.state.lock();

        match state.backlog.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.priority += boost;
                state.sort();
                true
            }
            None => false,
        }
    }

    /// Forget a file's completed or failed record so it can be queued again
    pub fn invalidate(&self, path: &Path) -> bool {
        let id = task_id(path);
        let removed = {
            let mut state = self.state.lock();
            let completed = state.completed.remove(&id);
            let failed = state.failed.remove(&id).is_some();
            completed || failed
        };

        if removed {
            self.emit_progress();
        }
        removed
    }

    /// Drop a still-pending task, e.g. for a file deleted before it was
    /// analyzed. In-flight tasks are left alone.
    pub fn remove_pending(&self, path: &Path) -> bool {
        let id = task_id(path);
        let removed = {
            let mut state = self.state.lock();
            let before = state.backlog.len();
            state.backlog.retain(|t| t.id != id);
            state.backlog.len() != before
        };

        if removed {
            self.emit_progress();
        }
        removed
    }

    /// Drain the backlog through `callback`. Returns once the backlog is empty
    /// or [`stop_processing`](Self::stop_processing) was called. A call made
    /// while a drain is already running returns immediately.
    pub async fn start_processing<F, Fut>(&self, callback: F, options: ProcessingOptions)
    where
        F: Fn(AnalysisTask) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        if !self.try_acquire() {
            debug!("analysis already in progress");
            return;
        }
        self.stop_requested.store(false, Ordering::Release);

        let options = ProcessingOptions {
            batch_size: options.batch_size.max(1),
            concurrency: options.concurrency.max(1),
            batch_pause: options.batch_pause,
        };
        info!(
            batch_size = options.batch_size,
            concurrency = options.concurrency,
            pending = self.pending_count(),
            "progressive analysis started"
        );

        loop {
            {
                let _running = RunningGuard { flag: &self.running };
                self.drain(&callback, &options).await;
            }

            // Work queued between the final empty check and the flag reset
            // would otherwise wait for the next explicit start.
            if self.stop_requested.load(Ordering::Acquire) || self.pending_count() == 0 || !self.try_acquire() {
                break;
            }
        }

        info!(progress = ?self.get_progress(), "progressive analysis idle");
    }

    /// Stop pulling new batches. Callbacks already running finish normally.
    pub fn stop_processing(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_processing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drop every task and record, and reset timing data
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            let session = state.session + 1;
            *state = QueueState {
                session,
                ..QueueState::default()
            };
        }
        self.profiler.clear();
        self.emit_progress();
    }

    /// Stop, clear and disconnect all subscribers
    pub fn dispose(&self) {
        self.stop_processing();
        self.clear();
        self.progress.close();
        self.completions.close();
        self.failures.close();
    }

    pub fn get_progress(&self) -> AnalysisProgress {
        self.state.lock().progress()
    }

    pub fn get_failed_tasks(&self) -> HashMap<String, FailedTask> {
        self.state.lock().failed.clone()
    }

    /// Backlog snapshot in processing order
    pub fn pending_tasks(&self) -> Vec<AnalysisTask> {
        self.state.lock().backlog.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().backlog.len()
    }

    pub fn status_of(&self, path: &Path) -> Option<TaskStatus> {
        let id = task_id(path);
        let state = self.state.lock();
        if state.completed.contains(&id) {
            Some(TaskStatus::Completed)
        } else if state.failed.contains_key(&id) {
            Some(TaskStatus::Failed)
        } else if state.processing.contains_key(&id) {
            Some(TaskStatus::Processing)
        } else if state.backlog.iter().any(|t| t.id == id) {
            Some(TaskStatus::Pending)
        } else {
            None
        }
    }

    pub fn get_performance_summary(&self) -> HashMap<String, OperationSummary> {
        self.profiler.summary()
    }

    fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn drain<F, Fut>(&self, callback: &F, options: &ProcessingOptions)
    where
        F: Fn(AnalysisTask) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        while !self.stop_requested.load(Ordering::Acquire) {
            let (batch, session) = self.next_batch(options.batch_size);
            if batch.is_empty() {
                break;
            }
            debug!(size = batch.len(), "processing batch");
            self.emit_progress();

            // Sliding window: a finished callback frees its slot for the next task
            let mut queued = batch.into_iter();
            let mut in_flight = FuturesUnordered::new();
            for task in queued.by_ref().take(options.concurrency) {
                in_flight.push(self.process_task(task, session, callback));
            }
            while in_flight.next().await.is_some() {
                if let Some(task) = queued.next() {
                    in_flight.push(self.process_task(task, session, callback));
                }
            }

            if self.pending_count() == 0 {
                break;
            }
            if !options.batch_pause.is_zero() {
                tokio::time::sleep(options.batch_pause).await;
            }
        }
    }

    /// Pop the highest-priority tasks and mark them in flight
    fn next_batch(&self, batch_size: usize) -> (Vec<AnalysisTask>, u64) {
        let mut state = self.state.lock();
        let take = batch_size.min(state.backlog.len());
        let mut batch: Vec<AnalysisTask> = state.backlog.drain(..take).collect();

        for task in &mut batch {
            task.status = TaskStatus::Processing;
            state.processing.insert(task.id.clone(), task.clone());
        }
        (batch, state.session)
    }

    async fn process_task<F, Fut>(&self, mut task: AnalysisTask, session: u64, callback: &F)
    where
        F: Fn(AnalysisTask) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let outcome = self
            .profiler
            .measure_async(
                task.kind.operation_name(),
                callback(task.clone()),
                metadata("filePath", task.file_path.display().to_string()),
            )
            .await;

        let mut completed = None;
        let mut failed = None;
        {
            let mut state = self.state.lock();
            if state.session != session {
                debug!(file = %task.file_path.display(), "discarding result from a cleared session");
                return;
            }
            state.processing.remove(&task.id);

            match outcome {
                Ok(()) => {
                    task.status = TaskStatus::Completed;
                    state.completed.insert(task.id.clone());
                    completed = Some(task);
                }
                Err(err) => {
                    task.retry_count += 1;
                    if task.retry_count < MAX_RETRIES {
                        task.priority = penalize(task.priority);
                        task.status = TaskStatus::Pending;
                        warn!(
                            file = %task.file_path.display(),
                            attempt = task.retry_count,
                            priority = task.priority,
                            error = %err,
                            "analysis failed, will retry"
                        );
                        state.backlog.push(task);
                        state.sort();
                    } else {
                        task.status = TaskStatus::Failed;
                        error!(file = %task.file_path.display(), error = %err, "analysis failed permanently");
                        let record = FailedTask {
                            task,
                            error: err.to_string(),
                        };
                        state.failed.insert(record.task.id.clone(), record.clone());
                        failed = Some(record);
                    }
                }
            }
        }

        if let Some(task) = completed {
            self.completions.emit(task);
        }
        if let Some(record) = failed {
            self.failures.emit(record);
        }
        self.emit_progress();
    }

    fn emit_progress(&self) {
        let progress = self.get_progress();
        self.progress.emit(progress);
    }
}

impl Default for ProgressiveAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decay a failing task's priority without pushing a non-negative priority below zero
fn penalize(priority: i64) -> i64 {
    (priority - RETRY_PENALTY).max(priority.min(0))
}
