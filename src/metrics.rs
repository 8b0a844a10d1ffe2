use std::time::Duration;

use metrics::{Counter, Histogram};

/// Batch-write meters, registered under a caller-supplied prefix.
///
/// Handles are created once and shared with the writer pool; workers
/// record after each fully successful batch. Collection and export are
/// the embedding process's concern.
#[derive(Clone, Debug)]
pub struct BatchWriteMetrics {
    time: Histogram,
    count: Counter,
    size: Counter,
    sec_per_item: Histogram,
    sec_per_byte: Histogram,
}

impl BatchWriteMetrics {
    /// Register the batch-write meters under `prefix`.
    pub fn register(prefix: &str) -> Self {
        Self {
            time: metrics::histogram!(format!("{prefix}batchwrite/time")),
            count: metrics::counter!(format!("{prefix}batchwrite/count")),
            size: metrics::counter!(format!("{prefix}batchwrite/size")),
            sec_per_item: metrics::histogram!(format!("{prefix}batchwrite/secperitem")),
            sec_per_byte: metrics::histogram!(format!("{prefix}batchwrite/secperbyte")),
        }
    }

    /// Record one fully successful batch.
    pub fn record(&self, elapsed: Duration, rows: usize, bytes: usize) {
        let secs = elapsed.as_secs_f64();
        self.time.record(secs);
        self.count.increment(rows as u64);
        self.size.increment(bytes as u64);
        if rows > 0 {
            self.sec_per_item.record(secs / rows as f64);
        }
        if bytes > 0 {
            self.sec_per_byte.record(secs / bytes as f64);
        }
    }
}
