//! Analysis task model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Category of analysis a file needs. Ordered by analysis value, models first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Model,
    Route,
    View,
    Template,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [Self::Model, Self::Route, Self::View, Self::Template];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Route => "route",
            Self::View => "view",
            Self::Template => "template",
        }
    }

    /// Name under which the profiler records analyses of this kind
    pub fn operation_name(&self) -> String {
        format!("analyze_{}", self.as_str())
    }

    /// Base priority used when a whole project is queued
    pub fn discovery_priority(&self) -> i64 {
        match self {
            Self::Model => 50,
            Self::Route => 40,
            Self::View => 30,
            Self::Template => 20,
        }
    }

    /// Classify a project file by its conventional name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        match name {
            "models.py" => Some(Self::Model),
            "urls.py" => Some(Self::Route),
            "views.py" => Some(Self::View),
            _ if name.ends_with(".html")
                && path.components().any(|c| c.as_os_str() == "templates") =>
            {
                Some(Self::Template)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A unit of pending analysis work. The id is the file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: String,
    pub kind: TaskKind,
    pub file_path: PathBuf,
    pub priority: i64,
    pub status: TaskStatus,
    pub retry_count: u32,
}

impl AnalysisTask {
    pub fn new(file_path: impl Into<PathBuf>, kind: TaskKind, priority: i64) -> Self {
        let file_path = file_path.into();
        Self {
            id: task_id(&file_path),
            kind,
            file_path,
            priority,
            status: TaskStatus::Pending,
            retry_count: 0,
        }
    }
}

/// Identity of the task analyzing `path`
pub fn task_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Snapshot of scheduler progress, recomputed after every state transition
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalysisProgress {
    pub total_files: usize,
    pub analyzed_files: usize,
    pub pending_files: usize,
    pub processing_files: usize,
    pub failed_files: usize,
    pub percentage: f64,
}

impl AnalysisProgress {
    pub fn compute(pending: usize, processing: usize, completed: usize, failed: usize) -> Self {
        let total = pending + processing + completed + failed;
        let percentage = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_files: total,
            analyzed_files: completed,
            pending_files: pending,
            processing_files: processing,
            failed_files: failed,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending_files == 0 && self.processing_files == 0
    }
}
