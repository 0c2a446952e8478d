use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metrics collector for performance tracking
pub struct Metrics {
    operation_latencies: Mutex<HashMap<String, Histogram<u64>>>,
    writes: AtomicU64,
    group_commits: AtomicU64,
    grouped_batches: AtomicU64,
    bytes_appended: AtomicU64,
    sync_count: AtomicU64,
    failed_groups: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operation_latencies: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
            group_commits: AtomicU64::new(0),
            grouped_batches: AtomicU64::new(0),
            bytes_appended: AtomicU64::new(0),
            sync_count: AtomicU64::new(0),
            failed_groups: AtomicU64::new(0),
        }
    }

    pub fn record_latency(&self, operation: &str, duration: Duration) {
        let Ok(mut latencies) = self.operation_latencies.lock() else {
            return;
        };
        if !latencies.contains_key(operation) {
            match Histogram::<u64>::new(3) {
                Ok(histogram) => {
                    latencies.insert(operation.to_string(), histogram);
                }
                Err(e) => {
                    tracing::warn!("Failed to create latency histogram: {}", e);
                    return;
                }
            }
        }
        if let Some(histogram) = latencies.get_mut(operation) {
            let micros = duration.as_micros() as u64;
            let _ = histogram.record(micros);
        }
    }

    /// Counts a committed write batch.
    pub fn increment_writes(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one applied group of `batches` batches and `bytes` payload bytes.
    pub fn record_group(&self, batches: usize, bytes: usize) {
        self.group_commits.fetch_add(1, Ordering::Relaxed);
        self.grouped_batches.fetch_add(batches as u64, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn increment_failed_groups(&self) {
        self.failed_groups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sync(&self) {
        self.sync_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_percentiles(&self, operation: &str) -> (f64, f64, f64) {
        let Ok(latencies) = self.operation_latencies.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if let Some(histogram) = latencies.get(operation) {
            let p50 = histogram.value_at_quantile(0.50) as f64;
            let p95 = histogram.value_at_quantile(0.95) as f64;
            let p99 = histogram.value_at_quantile(0.99) as f64;
            (p50, p95, p99)
        } else {
            (0.0, 0.0, 0.0)
        }
    }

    pub fn get_writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let mut operation_latencies = HashMap::new();
        if let Ok(latencies) = self.operation_latencies.lock() {
            for (op, histogram) in latencies.iter() {
                let p50 = histogram.value_at_quantile(0.50) as f64;
                let p95 = histogram.value_at_quantile(0.95) as f64;
                let p99 = histogram.value_at_quantile(0.99) as f64;
                operation_latencies.insert(op.clone(), (p50, p95, p99));
            }
        }

        MetricsReport {
            writes: self.writes.load(Ordering::Relaxed),
            group_commits: self.group_commits.load(Ordering::Relaxed),
            grouped_batches: self.grouped_batches.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            sync_count: self.sync_count.load(Ordering::Relaxed),
            failed_groups: self.failed_groups.load(Ordering::Relaxed),
            operation_latencies,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsReport {
    pub writes: u64,
    pub group_commits: u64,
    pub grouped_batches: u64,
    pub bytes_appended: u64,
    pub sync_count: u64,
    pub failed_groups: u64,
    pub operation_latencies: HashMap<String, (f64, f64, f64)>, // (p50, p95, p99)
}

impl MetricsReport {
    /// Average number of batches served by one log append.
    pub fn average_group_size(&self) -> f64 {
        if self.group_commits == 0 {
            0.0
        } else {
            self.grouped_batches as f64 / self.group_commits as f64
        }
    }
}
