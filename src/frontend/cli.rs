//! Command-line interface

use super::config::{Config, CONFIG_FILE_NAME};
use crate::analysis::project::{DigestAnalyzer, ProjectAnalyzer};
use crate::analysis::task::AnalysisProgress;
use crate::errors::BoxError;
use crate::infrastructure::logging::init_logging;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "djanalyze")]
#[command(about = "Progressive analysis of Django projects")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze every model, route, view and template file under a project root
    Scan {
        /// Project root
        root: PathBuf,

        /// Config file (defaults to the nearest .djanalyze.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Tasks pulled from the backlog per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Callbacks awaited at once within a batch
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the performance report when done
        #[arg(long)]
        report: bool,

        /// Print results as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Debug logging
        #[arg(long, short = 'v')]
        verbose: bool,
    },
    /// Write the default configuration file
    InitConfig {
        /// Destination (defaults to ./.djanalyze.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse arguments and run. Returns the process exit code.
pub fn main() -> Result<i32, BoxError> {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> Result<i32, BoxError> {
    match cli.command {
        Commands::Scan {
            root,
            config,
            batch_size,
            concurrency,
            report,
            json,
            verbose,
        } => {
            let mut settings = match config {
                Some(path) => Config::load(&path)?,
                None => Config::discover_from(&root),
            };
            if let Some(batch_size) = batch_size {
                settings.scheduler.batch_size = batch_size;
            }
            if let Some(concurrency) = concurrency {
                settings.scheduler.concurrency = concurrency;
            }

            let mut log_config = settings.logging.to_log_config();
            if verbose {
                log_config = log_config.with_level(Level::DEBUG);
            }
            let _guard = init_logging(log_config);

            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(scan(root, settings, report, json))
        }
        Commands::InitConfig { path, force } => {
            let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            init_config(&path, force)?;
            println!("Wrote {}", path.display());
            Ok(0)
        }
    }
}

async fn scan(root: PathBuf, config: Config, report: bool, json_output: bool) -> Result<i32, BoxError> {
    let project = ProjectAnalyzer::new(root, config, DigestAnalyzer);
    let queued = project.queue_project()?;
    info!(queued, "starting analysis");

    let progress = project.subscribe_progress();
    let (finished, mut done) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let mut printer = ProgressPrinter::default();
        loop {
            tokio::select! {
                biased;
                update = progress.recv_async() => match update {
                    Ok(update) => printer.print(&update),
                    Err(_) => break,
                },
                _ = &mut done => {
                    // Every update emitted during the run is already buffered
                    progress.try_iter().for_each(|update| printer.print(&update));
                    break;
                }
            }
        }
    });

    project.run().await;
    let _ = finished.send(());
    if let Err(err) = printer.await {
        warn!(error = %err, "progress printer ended abnormally");
    }

    let failed = project.scheduler().get_failed_tasks();
    let mut failed: Vec<_> = failed.values().collect();
    failed.sort_by(|a, b| a.task.id.cmp(&b.task.id));

    if json_output {
        let results: Vec<_> = project
            .results()
            .iter()
            .map(|(path, digest)| json!({ "path": path, "digest": digest.as_ref() }))
            .collect();
        let output = json!({
            "progress": project.progress(),
            "results": results,
            "failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (path, digest) in project.results() {
            println!(
                "{:<9} {:>6} lines {:>4} defs  {}",
                digest.kind.as_str(),
                digest.lines,
                digest.definitions,
                display_relative(project.root(), &path)
            );
        }
        for record in &failed {
            eprintln!("failed: {} ({})", record.task.file_path.display(), record.error);
        }
        let summary = project.progress();
        println!(
            "Analyzed {} of {} files, {} failed",
            summary.analyzed_files, summary.total_files, summary.failed_files
        );
    }

    if report {
        println!("\n{}", project.performance_report().to_markdown());
    }

    project.dispose();
    Ok(if failed.is_empty() { 0 } else { 1 })
}

fn init_config(path: &Path, force: bool) -> Result<(), BoxError> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    Config::default().save(path)?;
    Ok(())
}

/// Prints a line whenever the analyzed count moves
#[derive(Default)]
struct ProgressPrinter {
    last_analyzed: Option<usize>,
}

impl ProgressPrinter {
    fn line(&mut self, progress: &AnalysisProgress) -> Option<String> {
        if self.last_analyzed == Some(progress.analyzed_files) {
            return None;
        }
        self.last_analyzed = Some(progress.analyzed_files);
        Some(progress_line(progress))
    }

    fn print(&mut self, progress: &AnalysisProgress) {
        if let Some(line) = self.line(progress) {
            eprintln!("{}", line);
        }
    }
}

fn progress_line(progress: &AnalysisProgress) -> String {
    format!(
        "[{:>3.0}%] {}/{} analyzed, {} pending, {} failed",
        progress.percentage,
        progress.analyzed_files,
        progress.total_files,
        progress.pending_files,
        progress.failed_files
    )
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan_flags() {
        let cli = Cli::parse_from(["djanalyze", "scan", "site", "--batch-size", "4", "--json"]);
        match cli.command {
            Commands::Scan { root, batch_size, json, report, .. } => {
                assert_eq!(root, PathBuf::from("site"));
                assert_eq!(batch_size, Some(4));
                assert!(json);
                assert!(!report);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_progress_printer_skips_repeats() {
        let mut printer = ProgressPrinter::default();
        assert!(printer.line(&AnalysisProgress::compute(4, 0, 0, 0)).is_some());
        assert!(printer.line(&AnalysisProgress::compute(3, 1, 0, 0)).is_none());
        assert_eq!(
            printer.line(&AnalysisProgress::compute(0, 0, 4, 0)).as_deref(),
            Some("[100%] 4/4 analyzed, 0 pending, 0 failed")
        );
    }

    #[tokio::test]
    async fn test_scan_completes_after_printing_progress() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("shop/models.py");
        std::fs::create_dir_all(models.parent().unwrap()).unwrap();
        std::fs::write(&models, "class Shop:\n    pass\n").unwrap();

        let mut config = Config::default();
        config.scheduler.batch_pause_ms = 0;
        let code = scan(dir.path().to_path_buf(), config, false, true).await.unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_progress_line_format() {
        let line = progress_line(&AnalysisProgress::compute(1, 0, 3, 0));
        assert_eq!(line, "[ 75%] 3/4 analyzed, 1 pending, 0 failed");
    }
}
