//! Performance report assembled from every layer of a project analysis

use super::task::AnalysisProgress;
use crate::infrastructure::concurrency::PoolStatus;
use crate::performance::cache::CacheStats;
use crate::performance::metrics::OperationSummary;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    /// Project-level operations (discovery, extraction)
    pub profiler_summary: HashMap<String, OperationSummary>,
    /// Per-task timings recorded by the scheduler
    pub progressive_summary: HashMap<String, OperationSummary>,
    pub progress: AnalysisProgress,
    pub cache_stats: CacheStats,
    pub worker_status: PoolStatus,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn sorted(summary: &HashMap<String, OperationSummary>) -> Vec<(&String, &OperationSummary)> {
    let mut rows: Vec<_> = summary.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));
    rows
}

impl PerformanceReport {
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Django Analysis - Performance Report\n\n");

        out.push_str("## Analysis Performance\n\n");
        out.push_str("| Operation | Count | Avg Duration (ms) | Total Duration (ms) |\n");
        out.push_str("|-----------|-------|-------------------|---------------------|\n");
        for (operation, s) in sorted(&self.profiler_summary) {
            let _ = writeln!(
                out,
                "| {} | {} | {:.2} | {:.2} |",
                operation,
                s.count,
                millis(s.avg_duration),
                millis(s.total_duration)
            );
        }

        out.push_str("\n## Progressive Analysis Performance\n\n");
        for (operation, s) in sorted(&self.progressive_summary) {
            let _ = writeln!(
                out,
                "- **{}**: {} operations, avg {:.2}ms, {} failed",
                operation,
                s.count,
                millis(s.avg_duration),
                s.errors
            );
        }
        let p = &self.progress;
        let _ = writeln!(
            out,
            "- **Progress**: {}/{} files ({:.0}%), {} pending, {} failed",
            p.analyzed_files, p.total_files, p.percentage, p.pending_files, p.failed_files
        );

        out.push_str("\n## Cache Statistics\n\n");
        let c = &self.cache_stats;
        let _ = writeln!(out, "- **Cache Size**: {} / {} items", c.size, c.max_size);
        let _ = writeln!(out, "- **Memory Usage**: {:.2} / {} MB", c.memory_usage_mb, c.max_memory_mb);
        let _ = writeln!(out, "- **Hit Rate**: {:.1}%", c.hit_rate() * 100.0);

        out.push_str("\n## Background Worker Status\n\n");
        let w = &self.worker_status;
        let _ = writeln!(out, "- **Queue Length**: {}", w.queue_length);
        let _ = writeln!(out, "- **Active Tasks**: {}", w.active_tasks);
        let _ = writeln!(out, "- **Status**: {}", if w.is_running { "Running" } else { "Stopped" });

        out
    }
}
