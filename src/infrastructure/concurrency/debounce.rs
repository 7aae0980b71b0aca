//! Keyed debouncing
//!
//! At most one execution is pending per key. Scheduling a key again aborts
//! the pending timer and starts a fresh one, so a burst of calls collapses
//! into a single run after the burst goes quiet.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct DebouncedExecutor {
    delay: Mutex<Duration>,
    timers: Arc<Mutex<HashMap<String, PendingTimer>>>,
    generation: AtomicU64,
    runtime: Option<Handle>,
}

impl DebouncedExecutor {
    /// Timers run on the runtime current at construction, or at each
    /// `execute` call when constructed outside one.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: Mutex::new(delay),
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Schedule `task` to run after the delay, replacing any pending run for
    /// `key`. Returns false when no runtime is available.
    pub fn execute<F, E>(&self, key: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let key = key.into();
        let runtime = match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                warn!(key = %key, "no async runtime, dropping debounced task");
                return false;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let delay = *self.delay.lock();
        let timers = Arc::clone(&self.timers);
        let task_key = key.clone();

        // Held across the spawn so the timer cannot fire before it is registered
        let mut pending = self.timers.lock();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = timers.lock();
                match timers.get(&task_key) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&task_key);
                    }
                    _ => return,
                }
            }

            if let Err(err) = task.await {
                warn!(key = %task_key, error = %err, "debounced task failed");
            }
        });

        if let Some(previous) = pending.insert(key.clone(), PendingTimer { generation, handle }) {
            previous.handle.abort();
            debug!(key = %key, "debounced task superseded");
        }
        true
    }

    /// Drop the pending run for `key` without executing it
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.handle.abort();
        }
    }

    /// Applies to runs scheduled after this call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn delay(&self) -> Duration {
        *self.delay.lock()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.timers.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Default for DebouncedExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

impl Drop for DebouncedExecutor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
