//! Project-level orchestration
//!
//! Wires the progressive scheduler to the filesystem: discovers Django files
//! under a project root, analyzes them through a pluggable [`FileAnalyzer`]
//! behind the content-hash cache, reacts to edits with debouncing, and
//! offers one-off background analysis through the worker pool.

use super::focus::{EditorContext, Headless};
use super::report::PerformanceReport;
use super::scheduler::ProgressiveAnalyzer;
use super::task::{task_id, AnalysisProgress, AnalysisTask, TaskKind, TaskStatus};
use crate::errors::{BoxError, ProjectError};
use crate::frontend::config::Config;
use crate::infrastructure::concurrency::{DebouncedExecutor, Job, WorkerEvent, WorkerPool};
use crate::performance::cache::{ContentCache, EstimateSize};
use crate::performance::metrics::{metadata, Profiler};
use async_trait::async_trait;
use dashmap::DashMap;
use flume::Receiver;
use glob::Pattern;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Extracts whatever a caller needs from one project file
#[async_trait]
pub trait FileAnalyzer: Send + Sync + 'static {
    type Output: EstimateSize + Clone + Send + Sync + 'static;

    async fn analyze(&self, kind: TaskKind, path: &Path, content: &str) -> Result<Self::Output, BoxError>;
}

/// Cheap structural summary of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDigest {
    pub kind: TaskKind,
    pub lines: usize,
    pub bytes: usize,
    /// Top-level `class`/`def` statements, or `{% block %}` tags in templates
    pub definitions: usize,
}

impl EstimateSize for FileDigest {
    fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Default analyzer: counts lines, bytes and top-level definitions
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestAnalyzer;

impl DigestAnalyzer {
    pub fn digest(kind: TaskKind, content: &str) -> FileDigest {
        let definitions = match kind {
            TaskKind::Template => content.matches("{% block").count(),
            _ => content
                .lines()
                .filter(|line| {
                    line.starts_with("class ") || line.starts_with("def ") || line.starts_with("async def ")
                })
                .count(),
        };

        FileDigest {
            kind,
            lines: content.lines().count(),
            bytes: content.len(),
            definitions,
        }
    }
}

#[async_trait]
impl FileAnalyzer for DigestAnalyzer {
    type Output = FileDigest;

    async fn analyze(&self, kind: TaskKind, _path: &Path, content: &str) -> Result<FileDigest, BoxError> {
        Ok(Self::digest(kind, content))
    }
}

type Output<A> = Arc<<A as FileAnalyzer>::Output>;

struct ProjectInner<A: FileAnalyzer> {
    root: PathBuf,
    config: Config,
    analyzer: A,
    scheduler: ProgressiveAnalyzer,
    cache: ContentCache<A::Output>,
    results: DashMap<PathBuf, Output<A>>,
    pool: WorkerPool<PathBuf, Output<A>>,
    debouncer: DebouncedExecutor,
    profiler: Arc<Profiler>,
    drains: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: FileAnalyzer> ProjectInner<A> {
    /// Read, consult the cache, analyze on a miss
    async fn analyze_file(&self, kind: TaskKind, path: &Path) -> Result<Output<A>, BoxError> {
        let content = tokio::fs::read_to_string(path).await?;
        let key = task_id(path);

        let output = match self.cache.get_if_valid(&key, &content) {
            Some(hit) => {
                debug!(file = %path.display(), "cache hit");
                hit
            }
            None => {
                let fresh = self
                    .profiler
                    .measure_async(
                        format!("extract_{}", kind.as_str()),
                        self.analyzer.analyze(kind, path, &content),
                        metadata("filePath", key.clone()),
                    )
                    .await?;
                self.cache.set_with_hash(&key, &content, fresh.clone());
                Arc::new(fresh)
            }
        };

        self.results.insert(path.to_path_buf(), Arc::clone(&output));
        Ok(output)
    }

    async fn drain(self: Arc<Self>) {
        let inner = Arc::clone(&self);
        let callback = move |task: AnalysisTask| {
            let inner = Arc::clone(&inner);
            async move { inner.analyze_file(task.kind, &task.file_path).await.map(|_| ()) }
        };

        self.scheduler
            .start_processing(callback, self.config.scheduler.processing_options())
            .await;
    }

    fn spawn_drain(self: &Arc<Self>) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("cannot start analysis outside an async runtime");
                return false;
            }
        };

        // A spawn that loses the race with a running drain returns at once;
        // the running drain picks up anything queued before it goes idle.
        let handle = runtime.spawn(Arc::clone(self).drain());
        let mut drains = self.drains.lock();
        drains.retain(|h| !h.is_finished());
        drains.push(handle);
        true
    }

    fn apply_change(self: &Arc<Self>, path: PathBuf) {
        let key = task_id(&path);
        self.cache.delete(&key);

        if !path.is_file() {
            debug!(file = %path.display(), "file removed");
            self.results.remove(&path);
            self.scheduler.remove_pending(&path);
            self.scheduler.invalidate(&path);
            return;
        }

        let boost = self.config.priority.change_boost;
        if self.scheduler.reprioritize_file(&path, boost) {
            debug!(file = %path.display(), boost, "boosted pending file");
            self.spawn_drain();
            return;
        }

        let kind = match TaskKind::from_path(&path) {
            Some(kind) => kind,
            None => return,
        };
        if self.scheduler.status_of(&path) == Some(TaskStatus::Processing) {
            debug!(file = %path.display(), "changed while processing, result may be stale");
            return;
        }

        self.scheduler.invalidate(&path);
        self.scheduler.add_to_queue([&path], kind, kind.discovery_priority() + boost);
        self.spawn_drain();
    }
}

/// Progressive analysis of one Django project
pub struct ProjectAnalyzer<A: FileAnalyzer = DigestAnalyzer> {
    inner: Arc<ProjectInner<A>>,
}

impl<A: FileAnalyzer> Clone for ProjectAnalyzer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: FileAnalyzer> ProjectAnalyzer<A> {
    pub fn new(root: impl Into<PathBuf>, config: Config, analyzer: A) -> Self {
        Self::with_editor(root, config, analyzer, Arc::new(Headless))
    }

    pub fn with_editor(
        root: impl Into<PathBuf>,
        config: Config,
        analyzer: A,
        editor: Arc<dyn EditorContext>,
    ) -> Self {
        let scheduler = ProgressiveAnalyzer::new()
            .with_editor(editor)
            .with_policy(config.priority.clone());
        let cache = ContentCache::new(config.cache.max_entries, config.cache.max_memory_mb);
        let pool = WorkerPool::new(config.workers.count)
            .with_poll_interval(Duration::from_millis(config.workers.poll_interval_ms));
        let debouncer = DebouncedExecutor::new(Duration::from_millis(config.debounce.delay_ms));

        let inner = Arc::new(ProjectInner {
            root: root.into(),
            config,
            analyzer,
            scheduler,
            cache,
            results: DashMap::new(),
            pool,
            debouncer,
            profiler: Arc::new(Profiler::new()),
            drains: Mutex::new(Vec::new()),
        });
        register_handlers(&inner);

        Self { inner }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &ProgressiveAnalyzer {
        &self.inner.scheduler
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.inner.profiler
    }

    /// Find every model, route, view and template file under the root,
    /// skipping excluded paths, grouped by kind
    pub fn discover(&self) -> Result<BTreeMap<TaskKind, Vec<PathBuf>>, ProjectError> {
        let root = &self.inner.root;
        if !root.is_dir() {
            return Err(ProjectError::RootNotFound(root.display().to_string()));
        }

        let excludes = self.inner.config.exclude_patterns()?;
        let base = Pattern::escape(&root.to_string_lossy());
        let mut found = BTreeMap::new();

        for kind in TaskKind::ALL {
            let pattern = format!("{}/{}", base, discovery_glob(kind));
            let entries = glob::glob(&pattern).map_err(|e| ProjectError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;

            let mut files = Vec::new();
            for entry in entries {
                let path = match entry {
                    Ok(path) => path,
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable path");
                        continue;
                    }
                };
                let relative = path.strip_prefix(root).unwrap_or(&path);
                if excludes.iter().any(|p| p.matches_path(relative)) {
                    continue;
                }
                if TaskKind::from_path(&path) == Some(kind) {
                    files.push(path);
                }
            }
            found.insert(kind, files);
        }

        Ok(found)
    }

    /// Discover the project and queue it with kind-specific priorities.
    /// Returns the number of newly queued files.
    pub fn queue_project(&self) -> Result<usize, ProjectError> {
        let profiler = Arc::clone(&self.inner.profiler);
        profiler.measure_sync(
            "queue_project",
            || -> Result<usize, ProjectError> {
                let discovered = self.discover()?;
                let mut queued = 0;
                for (kind, files) in &discovered {
                    queued += self.inner.scheduler.add_to_queue(files, *kind, kind.discovery_priority());
                }
                info!(root = %self.inner.root.display(), queued, "project queued");
                Ok(queued)
            },
            metadata("root", self.inner.root.display().to_string()),
        )
    }

    /// Drain the backlog in a background task
    pub fn start(&self) -> bool {
        self.inner.spawn_drain()
    }

    /// Drain the backlog on the current task
    pub async fn run(&self) {
        Arc::clone(&self.inner).drain().await;
    }

    /// Wait until every background drain, including ones started while
    /// waiting, has finished
    pub async fn join(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.drains.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "analysis task ended abnormally");
                }
            }
        }
    }

    /// Report an edit. Bursts for the same file collapse into one
    /// re-analysis after the debounce delay.
    pub fn file_changed(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let inner = Arc::clone(&self.inner);
        self.inner.debouncer.execute(task_id(&path), async move {
            inner.apply_change(path);
            Ok::<(), BoxError>(())
        })
    }

    pub fn has_pending_change(&self, path: &Path) -> bool {
        self.inner.debouncer.is_pending(&task_id(path))
    }

    /// Analyze one file on the worker pool, outside the progressive backlog
    pub fn submit_background(&self, kind: TaskKind, path: impl Into<PathBuf>, priority: i64) {
        let path = path.into();
        let operation = kind.operation_name();
        let id = format!("{}:{}", operation, path.display());
        self.inner.pool.start();
        self.inner.pool.add_task(Job::new(id, operation, path, priority));
    }

    pub fn subscribe_background(&self) -> Receiver<WorkerEvent<Output<A>>> {
        self.inner.pool.subscribe()
    }

    pub async fn wait_for_background(&self) {
        self.inner.pool.wait_for_completion().await;
    }

    pub fn subscribe_progress(&self) -> Receiver<AnalysisProgress> {
        self.inner.scheduler.subscribe_progress()
    }

    pub fn progress(&self) -> AnalysisProgress {
        self.inner.scheduler.get_progress()
    }

    pub fn result(&self, path: &Path) -> Option<Output<A>> {
        self.inner.results.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// All results, ordered by path
    pub fn results(&self) -> Vec<(PathBuf, Output<A>)> {
        let mut results: Vec<_> = self
            .inner
            .results
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    pub fn performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            profiler_summary: self.inner.profiler.summary(),
            progressive_summary: self.inner.scheduler.get_performance_summary(),
            progress: self.inner.scheduler.get_progress(),
            cache_stats: self.inner.cache.stats(),
            worker_status: self.inner.pool.status(),
        }
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Stop all work and drop cached state. Callbacks already running finish.
    pub fn dispose(&self) {
        self.inner.scheduler.dispose();
        self.inner.pool.stop();
        self.inner.pool.clear_queue();
        self.inner.debouncer.cancel_all();
        self.inner.cache.clear();
        self.inner.results.clear();
    }
}

fn discovery_glob(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Model => "**/models.py",
        TaskKind::Route => "**/urls.py",
        TaskKind::View => "**/views.py",
        TaskKind::Template => "**/templates/**/*.html",
    }
}

/// One pool handler per kind. Handlers hold a weak reference so the pool,
/// owned by the project, does not keep it alive.
fn register_handlers<A: FileAnalyzer>(inner: &Arc<ProjectInner<A>>) {
    for kind in TaskKind::ALL {
        let weak: Weak<ProjectInner<A>> = Arc::downgrade(inner);
        inner.pool.register_fn(kind.operation_name(), move |path: PathBuf| {
            let weak = weak.clone();
            async move {
                let inner = weak.upgrade().ok_or_else(|| BoxError::from("project analyzer disposed"))?;
                inner.analyze_file(kind, &path).await
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_python() {
        let source = "from django.db import models\n\nclass Shop(models.Model):\n    def __str__(self):\n        pass\n\ndef helper():\n    pass\n";
        let digest = DigestAnalyzer::digest(TaskKind::Model, source);
        assert_eq!(digest.lines, 8);
        assert_eq!(digest.bytes, source.len());
        assert_eq!(digest.definitions, 2);
    }

    #[test]
    fn test_digest_template() {
        let source = "{% extends 'base.html' %}\n{% block content %}hi{% endblock %}\n{% block footer %}{% endblock %}";
        assert_eq!(DigestAnalyzer::digest(TaskKind::Template, source).definitions, 2);
    }

    #[test]
    fn test_discovery_globs_classify() {
        for kind in TaskKind::ALL {
            let sample = discovery_glob(kind).replace("**/*", "x").replace("**", "app");
            assert_eq!(TaskKind::from_path(Path::new(&sample)), Some(kind), "{}", sample);
        }
    }
}
