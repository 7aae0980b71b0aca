use async_trait::async_trait;
use djanalyze::analysis::{DigestAnalyzer, FileAnalyzer, ProjectAnalyzer, TaskKind, TaskStatus};
use djanalyze::{BoxError, Config, ProjectError, WorkerEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const MODELS: &str = "from django.db import models\n\nclass Shop(models.Model):\n    name = models.CharField(max_length=50)\n";
const URLS: &str = "from django.urls import path\nfrom . import views\n\nurlpatterns = [path('', views.index)]\n";
const VIEWS: &str = "def index(request):\n    pass\n\ndef detail(request, pk):\n    pass\n";
const TEMPLATE: &str = "{% extends 'base.html' %}\n{% block content %}{% endblock %}\n";

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn project_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "shop/models.py", MODELS);
    write(root, "shop/urls.py", URLS);
    write(root, "shop/views.py", VIEWS);
    write(root, "shop/templates/shop/index.html", TEMPLATE);
    write(root, "shop/admin.py", "from django.contrib import admin\n");
    write(root, "venv/lib/site/models.py", MODELS);
    dir
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.batch_pause_ms = 0;
    config.debounce.delay_ms = 20;
    config.workers.poll_interval_ms = 5;
    config
}

#[test]
fn test_discover_classifies_and_excludes() {
    let dir = project_dir();
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);

    let found = project.discover().unwrap();
    assert_eq!(found[&TaskKind::Model], vec![dir.path().join("shop/models.py")]);
    assert_eq!(found[&TaskKind::Route], vec![dir.path().join("shop/urls.py")]);
    assert_eq!(found[&TaskKind::View], vec![dir.path().join("shop/views.py")]);
    assert_eq!(found[&TaskKind::Template], vec![dir.path().join("shop/templates/shop/index.html")]);
}

#[test]
fn test_queue_project_orders_by_kind() {
    let dir = project_dir();
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);

    assert_eq!(project.queue_project().unwrap(), 4);
    let kinds: Vec<TaskKind> = project.scheduler().pending_tasks().iter().map(|t| t.kind).collect();
    assert_eq!(kinds, TaskKind::ALL.to_vec());

    // A second discovery finds nothing new
    assert_eq!(project.queue_project().unwrap(), 0);
    assert_eq!(project.profiler().records_for("queue_project").len(), 2);
}

#[test]
fn test_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let project = ProjectAnalyzer::new(dir.path().join("nope"), fast_config(), DigestAnalyzer);
    assert!(matches!(project.queue_project(), Err(ProjectError::RootNotFound(_))));
}

#[tokio::test]
async fn test_run_analyzes_every_file() {
    let dir = project_dir();
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);
    project.queue_project().unwrap();
    project.run().await;

    let progress = project.progress();
    assert_eq!(progress.analyzed_files, 4);
    assert_eq!(progress.percentage, 100.0);

    let models = project.result(&dir.path().join("shop/models.py")).unwrap();
    assert_eq!(models.kind, TaskKind::Model);
    assert_eq!(models.definitions, 1);
    let views = project.result(&dir.path().join("shop/views.py")).unwrap();
    assert_eq!(views.definitions, 2);
    assert_eq!(project.results().len(), 4);

    let report = project.performance_report();
    assert_eq!(report.progressive_summary["analyze_model"].count, 1);
    assert_eq!(report.profiler_summary["extract_view"].count, 1);
    assert_eq!(report.cache_stats.size, 4);
    assert!(report.to_markdown().contains("| extract_model | 1 |"));
}

#[tokio::test]
async fn test_unchanged_file_is_served_from_cache() {
    let dir = project_dir();
    let models = dir.path().join("shop/models.py");
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);
    project.queue_project().unwrap();
    project.run().await;

    assert!(project.scheduler().invalidate(&models));
    project.scheduler().add_to_queue([&models], TaskKind::Model, 50);
    project.run().await;

    let report = project.performance_report();
    assert_eq!(report.profiler_summary["extract_model"].count, 1);
    assert_eq!(report.progressive_summary["analyze_model"].count, 2);
    assert_eq!(report.cache_stats.hits, 1);
}

#[tokio::test]
async fn test_file_change_is_debounced_and_reanalyzed() {
    let dir = project_dir();
    let models = dir.path().join("shop/models.py");
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);
    project.queue_project().unwrap();
    project.run().await;
    assert_eq!(project.result(&models).unwrap().definitions, 1);

    fs::write(&models, format!("{}\nclass Order(models.Model):\n    pass\n", MODELS)).unwrap();
    for _ in 0..3 {
        assert!(project.file_changed(&models));
    }
    assert!(project.has_pending_change(&models));

    tokio::time::sleep(Duration::from_millis(200)).await;
    project.join().await;

    assert!(!project.has_pending_change(&models));
    assert_eq!(project.result(&models).unwrap().definitions, 2);
    assert_eq!(project.scheduler().status_of(&models), Some(TaskStatus::Completed));
    assert_eq!(project.performance_report().profiler_summary["extract_model"].count, 2);
}

#[tokio::test]
async fn test_deleted_file_is_forgotten() {
    let dir = project_dir();
    let views = dir.path().join("shop/views.py");
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);
    project.queue_project().unwrap();
    project.run().await;

    fs::remove_file(&views).unwrap();
    project.file_changed(&views);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(project.result(&views).is_none());
    assert_eq!(project.scheduler().status_of(&views), None);
}

#[tokio::test]
async fn test_background_submission() {
    let dir = project_dir();
    let urls = dir.path().join("shop/urls.py");
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);
    let events = project.subscribe_background();

    project.submit_background(TaskKind::Route, &urls, 10);
    project.submit_background(TaskKind::Route, dir.path().join("shop/missing.py"), 5);
    project.wait_for_background().await;

    let mut completed = 0;
    let mut failed = 0;
    for event in events.try_iter() {
        match event {
            WorkerEvent::Completed { result, .. } => {
                assert_eq!(result.kind, TaskKind::Route);
                completed += 1;
            }
            WorkerEvent::Failed { error, .. } => {
                assert!(!error.is_missing_handler());
                failed += 1;
            }
        }
    }
    assert_eq!((completed, failed), (1, 1));
    assert!(project.result(&urls).is_some());
    assert!(project.performance_report().worker_status.is_running);

    project.dispose();
    assert!(!project.performance_report().worker_status.is_running);
    assert!(project.results().is_empty());
}

#[tokio::test]
async fn test_file_deleted_while_pending_is_dropped() {
    let dir = project_dir();
    let views = dir.path().join("shop/views.py");
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), DigestAnalyzer);
    project.queue_project().unwrap();
    assert_eq!(project.scheduler().status_of(&views), Some(TaskStatus::Pending));

    fs::remove_file(&views).unwrap();
    project.file_changed(&views);
    while project.has_pending_change(&views) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(project.scheduler().status_of(&views), None);

    project.run().await;
    assert!(project.scheduler().get_failed_tasks().is_empty());
    assert_eq!(project.scheduler().status_of(&views), None);
    let progress = project.progress();
    assert_eq!(progress.analyzed_files, 3);
    assert!(progress.is_complete());
}

/// Takes a fixed time per file
struct SlowAnalyzer(Duration);

#[async_trait]
impl FileAnalyzer for SlowAnalyzer {
    type Output = String;

    async fn analyze(&self, kind: TaskKind, _path: &Path, _content: &str) -> Result<String, BoxError> {
        tokio::time::sleep(self.0).await;
        Ok(kind.to_string())
    }
}

#[tokio::test]
async fn test_join_waits_for_work_queued_during_a_run() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..5 {
        write(dir.path(), &format!("app{}/models.py", i), MODELS);
    }
    let mut config = fast_config();
    config.scheduler.concurrency = 1;
    let project = ProjectAnalyzer::new(dir.path(), config, SlowAnalyzer(Duration::from_millis(20)));
    assert_eq!(project.queue_project().unwrap(), 5);

    assert!(project.start());
    let late = write(dir.path(), "z/models.py", MODELS);
    project.file_changed(&late);
    while project.has_pending_change(&late) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(project.scheduler().is_processing());

    project.join().await;

    let progress = project.progress();
    assert!(progress.is_complete(), "{:?}", progress);
    assert_eq!(progress.analyzed_files, 6);
    assert!(!project.scheduler().is_processing());
    assert!(project.result(&late).is_some());
}

/// Fails the first `failures` attempts for each path
struct FlakyAnalyzer {
    failures: u32,
    attempts: Mutex<HashMap<PathBuf, u32>>,
}

#[async_trait]
impl FileAnalyzer for FlakyAnalyzer {
    type Output = String;

    async fn analyze(&self, kind: TaskKind, path: &Path, _content: &str) -> Result<String, BoxError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(path.to_path_buf()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= self.failures {
            return Err(format!("attempt {} failed", attempt).into());
        }
        Ok(kind.to_string())
    }
}

#[tokio::test]
async fn test_transient_analyzer_failures_are_retried() {
    let dir = project_dir();
    let analyzer = FlakyAnalyzer {
        failures: 2,
        attempts: Mutex::new(HashMap::new()),
    };
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), analyzer);
    project.queue_project().unwrap();
    project.run().await;

    assert_eq!(project.progress().analyzed_files, 4);
    assert!(project.scheduler().get_failed_tasks().is_empty());
    let template = project.result(&dir.path().join("shop/templates/shop/index.html")).unwrap();
    assert_eq!(template.as_str(), "template");
}

#[tokio::test]
async fn test_persistent_analyzer_failures_are_recorded() {
    let dir = project_dir();
    let analyzer = FlakyAnalyzer {
        failures: u32::MAX,
        attempts: Mutex::new(HashMap::new()),
    };
    let project = ProjectAnalyzer::new(dir.path(), fast_config(), analyzer);
    project.queue_project().unwrap();
    project.run().await;

    let failed = project.scheduler().get_failed_tasks();
    assert_eq!(failed.len(), 4);
    assert!(failed.values().all(|f| f.error == "attempt 3 failed"));
    assert_eq!(project.performance_report().profiler_summary["extract_model"].errors, 3);
}
