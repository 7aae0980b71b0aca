//! Operation profiling
//!
//! Every measured operation appends a [`ProfileRecord`] whether it succeeded or
//! not; [`Profiler::summary`] aggregates the records by operation name.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Free-form key/value annotations attached to a record (e.g. `filePath`)
pub type Metadata = BTreeMap<String, String>;

/// One measured invocation
#[derive(Debug, Clone, Serialize)]
pub struct ProfileRecord {
    pub operation: String,
    /// Wall-clock start, milliseconds since the Unix epoch
    pub start_time: u64,
    /// Wall-clock end, milliseconds since the Unix epoch
    pub end_time: u64,
    pub duration: Duration,
    pub metadata: Metadata,
    /// Set when the measured operation returned an error
    pub error: bool,
}

/// Aggregated timings for one operation name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub count: usize,
    pub total_duration: Duration,
    pub avg_duration: Duration,
    pub max_duration: Duration,
    pub errors: usize,
}

impl OperationSummary {
    fn from_records<'a>(records: impl Iterator<Item = &'a ProfileRecord>) -> Self {
        let mut count = 0usize;
        let mut total = Duration::ZERO;
        let mut max = Duration::ZERO;
        let mut errors = 0usize;

        for record in records {
            count += 1;
            total += record.duration;
            max = max.max(record.duration);
            if record.error {
                errors += 1;
            }
        }

        let avg = if count == 0 { Duration::ZERO } else { total / count as u32 };

        Self {
            count,
            total_duration: total,
            avg_duration: avg,
            max_duration: max,
            errors,
        }
    }
}

/// Collects timing records for named operations
#[derive(Debug, Default)]
pub struct Profiler {
    records: RwLock<Vec<ProfileRecord>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing an operation. The record is written when the returned
    /// guard is finished or dropped.
    pub fn start(&self, operation: impl Into<String>) -> Timer<'_> {
        Timer::new(self, operation)
    }

    /// Append a record for an operation measured elsewhere
    pub fn record(
        &self,
        operation: impl Into<String>,
        started: SystemTime,
        duration: Duration,
        metadata: Metadata,
        error: bool,
    ) {
        let operation = operation.into();
        let start_time = epoch_millis(started);
        let end_time = epoch_millis(started + duration);
        trace!(operation = %operation, ?duration, error, "operation measured");

        self.records.write().push(ProfileRecord {
            operation,
            start_time,
            end_time,
            duration,
            metadata,
            error,
        });
    }

    /// Measure a synchronous fallible operation. The record is written in
    /// both outcomes and the result is passed through unchanged.
    pub fn measure_sync<T, E, F>(&self, operation: impl Into<String>, f: F, metadata: Metadata) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let started = SystemTime::now();
        let start = Instant::now();
        let result = f();
        self.record(operation, started, start.elapsed(), metadata, result.is_err());
        result
    }

    /// Measure an asynchronous fallible operation
    pub async fn measure_async<T, E, F>(
        &self,
        operation: impl Into<String>,
        future: F,
        metadata: Metadata,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let operation = operation.into();
        let started = SystemTime::now();
        let start = Instant::now();
        let result = future.await;
        self.record(operation, started, start.elapsed(), metadata, result.is_err());
        result
    }

    pub fn records(&self) -> Vec<ProfileRecord> {
        self.records.read().clone()
    }

    pub fn records_for(&self, operation: &str) -> Vec<ProfileRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    /// Mean duration of an operation, zero when it was never recorded
    pub fn average_duration(&self, operation: &str) -> Duration {
        let records = self.records.read();
        OperationSummary::from_records(records.iter().filter(|r| r.operation == operation)).avg_duration
    }

    /// Aggregate all records by operation name
    pub fn summary(&self) -> HashMap<String, OperationSummary> {
        let records = self.records.read();
        let mut grouped: HashMap<&str, Vec<&ProfileRecord>> = HashMap::new();
        for record in records.iter() {
            grouped.entry(record.operation.as_str()).or_default().push(record);
        }

        grouped
            .into_iter()
            .map(|(name, recs)| (name.to_string(), OperationSummary::from_records(recs.into_iter())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Export all records as CSV with an `operation,startTime,endTime,duration,metadata` header
    pub fn export_csv(&self) -> String {
        let mut csv = String::from("operation,startTime,endTime,duration,metadata\n");
        for record in self.records.read().iter() {
            let metadata = serde_json::to_string(&record.metadata).unwrap_or_else(|_| "{}".to_string());
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                csv_field(&record.operation),
                record.start_time,
                record.end_time,
                record.duration.as_millis(),
                csv_field(&metadata),
            ));
        }
        csv
    }
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// RAII timer for automatic timing measurement
pub struct Timer<'a> {
    profiler: &'a Profiler,
    operation: String,
    started: SystemTime,
    start: Instant,
    metadata: Metadata,
    error: bool,
    finished: bool,
}

impl<'a> Timer<'a> {
    pub fn new(profiler: &'a Profiler, operation: impl Into<String>) -> Self {
        Self {
            profiler,
            operation: operation.into(),
            started: SystemTime::now(),
            start: Instant::now(),
            metadata: Metadata::new(),
            error: false,
            finished: false,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn mark_error(&mut self) {
        self.error = true;
    }

    /// Stop the timer now and return the measured duration
    pub fn finish(mut self) -> Duration {
        self.write()
    }

    fn write(&mut self) -> Duration {
        let duration = self.start.elapsed();
        if !self.finished {
            self.finished = true;
            self.profiler.record(
                std::mem::take(&mut self.operation),
                self.started,
                duration,
                std::mem::take(&mut self.metadata),
                self.error,
            );
        }
        duration
    }
}

impl<'a> Drop for Timer<'a> {
    fn drop(&mut self) {
        self.write();
    }
}

/// Global profiler instance
pub fn global_profiler() -> Arc<Profiler> {
    use once_cell::sync::Lazy;
    static PROFILER: Lazy<Arc<Profiler>> = Lazy::new(|| Arc::new(Profiler::new()));
    PROFILER.clone()
}

/// Convenience for building single-entry metadata
pub fn metadata(key: impl Into<String>, value: impl Into<String>) -> Metadata {
    let mut map = Metadata::new();
    map.insert(key.into(), value.into());
    map
}
