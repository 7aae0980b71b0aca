//! Scheduler benchmarks
//!
//! Measures backlog maintenance (sorted insertion, reprioritization) and the
//! cost of draining a backlog through no-op callbacks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use djanalyze::analysis::{ProcessingOptions, ProgressiveAnalyzer, TaskKind};
use std::path::Path;
use std::time::Duration;

fn project_files(count: usize, name: &str) -> Vec<String> {
    (0..count).map(|i| format!("app_{}/{}", i, name)).collect()
}

fn bench_add_to_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_to_queue");

    for size in [100, 1_000, 5_000] {
        let models = project_files(size, "models.py");
        let views = project_files(size, "views.py");

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let analyzer = ProgressiveAnalyzer::new();
                analyzer.add_to_queue(&models, TaskKind::Model, 50);
                analyzer.add_to_queue(&views, TaskKind::View, 30);
                black_box(analyzer.pending_count())
            });
        });
    }

    group.finish();
}

fn bench_reprioritize(c: &mut Criterion) {
    let analyzer = ProgressiveAnalyzer::new();
    analyzer.add_to_queue(project_files(2_000, "urls.py"), TaskKind::Route, 40);
    let target = Path::new("app_1999/urls.py");

    c.bench_function("reprioritize_tail", |b| {
        b.iter(|| black_box(analyzer.reprioritize_file(target, 1)));
    });
}

fn bench_drain(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("drain");
    let files = project_files(500, "models.py");

    for concurrency in [1, 3, 8] {
        group.bench_with_input(BenchmarkId::new("concurrency", concurrency), &concurrency, |b, &concurrency| {
            b.to_async(&runtime).iter(|| {
                let files = &files;
                async move {
                    let analyzer = ProgressiveAnalyzer::new();
                    analyzer.add_to_queue(files, TaskKind::Model, 50);
                    let options = ProcessingOptions::new()
                        .with_concurrency(concurrency)
                        .with_batch_pause(Duration::ZERO);
                    analyzer.start_processing(|_| async { Ok(()) }, options).await;
                    black_box(analyzer.get_progress())
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_to_queue, bench_reprioritize, bench_drain);
criterion_main!(benches);
