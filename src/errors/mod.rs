//! Error types shared across the scheduler, worker pool and configuration layers.

use std::fmt;
use std::io;

/// Error type returned by analysis callbacks and worker handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration loading and persistence errors
#[derive(Debug)]
pub enum ConfigError {
    Read { path: String, source: io::Error },
    Parse(String),
    Serialize(String),
    Write { path: String, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "Failed to read config {}: {}", path, source),
            Self::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
            Self::Serialize(msg) => write!(f, "Failed to serialize config: {}", msg),
            Self::Write { path, source } => write!(f, "Failed to write config {}: {}", path, source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Worker pool job failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No handler is registered for the job kind. Configuration defect, never retried.
    NoHandler { kind: String },
    /// The handler ran and returned an error
    Handler(String),
}

impl JobError {
    pub fn is_missing_handler(&self) -> bool {
        matches!(self, Self::NoHandler { .. })
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHandler { kind } => write!(f, "No handler registered for task type: {}", kind),
            Self::Handler(msg) => write!(f, "Handler failed: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

impl From<BoxError> for JobError {
    fn from(err: BoxError) -> Self {
        Self::Handler(err.to_string())
    }
}

/// Project discovery errors
#[derive(Debug)]
pub enum ProjectError {
    RootNotFound(String),
    Pattern { pattern: String, message: String },
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound(root) => write!(f, "Project root not found: {}", root),
            Self::Pattern { pattern, message } => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, message)
            }
        }
    }
}

impl std::error::Error for ProjectError {}
