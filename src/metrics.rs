//! Run metrics: named counters and run timing.
//!
//! The pipeline bumps counters as batches move through the stages
//! (`records_read`, `records_rejected`, `facts_inserted`, ...). At the end of a
//! run the collector can be printed or saved as JSON.
//!
//! ```no_run
//! use salesflow::metrics::MetricsCollector;
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::new();
//! metrics.record_start();
//! metrics.increment_counter("records_read", 3);
//! metrics.record_end();
//!
//! metrics.print();
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const RECORDS_READ: &str = "records_read";
pub const RECORDS_REJECTED: &str = "records_rejected";
pub const RECORDS_DUPLICATE: &str = "records_duplicate";
pub const FACTS_INSERTED: &str = "facts_inserted";
pub const FACTS_UPDATED: &str = "facts_updated";
pub const FACTS_SKIPPED: &str = "facts_skipped";
pub const BATCHES_COMMITTED: &str = "batches_committed";
pub const BATCHES_FAILED: &str = "batches_failed";
pub const CUSTOMERS_RESCORED: &str = "customers_rescored";
pub const SEGMENTATION_FAILURES: &str = "segmentation_failures";

/// Thread-safe, cheaply cloneable metrics container.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    counters: BTreeMap<String, u64>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves plain counters, which are still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Elapsed run time, once both start and end are recorded.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to the counter `name`, creating it at zero if absent.
    pub fn increment_counter(&self, name: &str, value: u64) {
        *self.lock().counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.lock().counters.insert(name.to_string(), value);
    }

    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// All counters plus `execution_time_ms` when timing is complete.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut out = serde_json::Map::new();
        for (name, value) in &inner.counters {
            out.insert(name.clone(), json!(value));
        }
        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            out.insert(
                "execution_time_ms".to_string(),
                json!(end.duration_since(start).as_millis()),
            );
        }
        Value::Object(out)
    }

    /// Print all metrics to stdout in a human-readable format.
    pub fn print(&self) {
        println!("\n========== Run Metrics ==========");
        if let Some(elapsed) = self.elapsed() {
            println!(
                "Execution Time: {:.3}s ({} ms)",
                elapsed.as_secs_f64(),
                elapsed.as_millis()
            );
            println!("---------------------------------");
        }
        for (name, value) in &self.lock().counters {
            println!("{name}: {value}");
        }
        println!("=================================\n");
    }

    /// Write [`to_json`](Self::to_json) pretty-printed to `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.lock().counters.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = MetricsCollector::new();
        let handle = metrics.clone();
        metrics.increment_counter(RECORDS_READ, 3);
        handle.increment_counter(RECORDS_READ, 2);
        assert_eq!(metrics.counter(RECORDS_READ), 5);
        assert_eq!(metrics.counter(FACTS_SKIPPED), 0);
    }

    #[test]
    fn json_includes_timing_once_finished() {
        let metrics = MetricsCollector::new();
        metrics.set_counter(BATCHES_COMMITTED, 1);
        assert!(metrics.to_json().get("execution_time_ms").is_none());
        metrics.record_start();
        metrics.record_end();
        let json = metrics.to_json();
        assert_eq!(json[BATCHES_COMMITTED], 1);
        assert!(json.get("execution_time_ms").is_some());
    }
}
