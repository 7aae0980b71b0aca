use crate::analysis::priority::PriorityPolicy;
use crate::analysis::scheduler::ProcessingOptions;
use crate::errors::{ConfigError, ProjectError};
use crate::infrastructure::logging::{parse_level, LogConfig, LogFormat};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = ".djanalyze.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub priority: PriorityPolicy,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_ms")]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: LogFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_debounce_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            filter: None,
        }
    }
}

fn default_batch_size() -> usize { 10 }
fn default_concurrency() -> usize { 3 }
fn default_batch_pause_ms() -> u64 { 100 }
fn default_max_entries() -> usize { 1000 }
fn default_worker_count() -> usize { 3 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_max_memory_mb() -> usize { 100 }
fn default_debounce_ms() -> u64 { 500 }
fn default_level() -> String { "info".to_string() }
fn default_format() -> LogFormat { LogFormat::Compact }

fn default_exclude() -> Vec<String> {
    ["node_modules", "__pycache__", "venv", ".venv", ".git"]
        .iter()
        .map(|dir| format!("**/{}/**", dir))
        .collect()
}

impl SchedulerConfig {
    pub fn processing_options(&self) -> ProcessingOptions {
        ProcessingOptions {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }
}

impl LoggingConfig {
    /// Unknown level names fall back to info
    pub fn to_log_config(&self) -> LogConfig {
        let level = parse_level(&self.level).unwrap_or_else(|| {
            warn!(level = %self.level, "unknown log level, using info");
            tracing::Level::INFO
        });

        let config = LogConfig::new().with_level(level).with_format(self.format);
        match &self.filter {
            Some(filter) => config.with_filter(filter.clone()),
            None => config,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Nearest `.djanalyze.toml` in the current directory or its parents,
    /// defaults when none is found
    pub fn discover() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Self::default(),
        }
    }

    pub fn discover_from(start: &Path) -> Self {
        match Self::find_file(start) {
            Some(path) => Self::load(&path).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "ignoring unreadable config");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    fn find_file(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Compiled exclusion patterns
    pub fn exclude_patterns(&self) -> Result<Vec<Pattern>, ProjectError> {
        self.paths
            .exclude
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|e| ProjectError::Pattern {
                    pattern: raw.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Invalid patterns never match
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.paths
            .exclude
            .iter()
            .filter_map(|raw| Pattern::new(raw).ok())
            .any(|pattern| pattern.matches_path(path))
    }

    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_else(|_| String::from("# Failed to generate config\n"))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.concurrency, 3);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.debounce.delay_ms, 500);
        assert_eq!(config.priority, PriorityPolicy::default());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[scheduler]
batch_size = 4
batch_pause_ms = 0

[priority]
focused_bonus = 200

[logging]
level = "debug"
format = "json"
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.scheduler.batch_size, 4);
        assert_eq!(config.scheduler.concurrency, 3);
        assert_eq!(config.priority.focused_bonus, 200);
        assert_eq!(config.priority.visible_bonus, 50);

        let options = config.scheduler.processing_options();
        assert_eq!(options.batch_pause, Duration::ZERO);

        let log = config.logging.to_log_config();
        assert_eq!(log.level, tracing::Level::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
    }

    #[test]
    fn test_parse_error() {
        let err = Config::parse("[scheduler]\nbatch_size = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_worker_defaults_independent_of_scheduler() {
        let toml = "[scheduler]\nconcurrency = 8\nbatch_pause_ms = 0\n\n[workers]\n";
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.workers.count, 3);
        assert_eq!(config.workers.poll_interval_ms, 100);
        assert_eq!(config.workers, WorkersConfig::default());
    }

    #[test]
    fn test_is_excluded() {
        let config = Config::default();
        assert!(!config.is_excluded(Path::new("shop/models.py")));
        assert!(config.is_excluded(Path::new("venv/lib/python3.11/site.py")));
        assert!(config.is_excluded(Path::new("web/node_modules/pkg/views.py")));
        assert!(config.exclude_patterns().is_ok());

        let mut broken = Config::default();
        broken.paths.exclude = vec!["[".to_string()];
        assert!(broken.exclude_patterns().is_err());
        assert!(!broken.is_excluded(Path::new("shop/models.py")));
    }

    #[test]
    fn test_save_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("project/app");
        fs::create_dir_all(&nested).unwrap();

        let mut config = Config::default();
        config.scheduler.batch_size = 25;
        config.save(&dir.path().join(CONFIG_FILE_NAME)).unwrap();

        let found = Config::discover_from(&nested);
        assert_eq!(found.scheduler.batch_size, 25);
    }

    #[test]
    fn test_generated_default_round_trips() {
        let generated = Config::generate_default();
        assert_eq!(Config::parse(&generated).unwrap(), Config::default());
    }
}
