//! Per-connector statistics
//!
//! Atomic counters updated by the supervisor loop and read through the
//! shared status surface. Batch latency marks record, for the most recent
//! batch, when its first and last events were produced at the source,
//! emitted by the producer, and applied to the destination.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Epoch-millisecond marks for the most recent batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchMarks {
    pub source_first_ms: i64,
    pub producer_first_ms: i64,
    pub destination_first_ms: i64,
    pub source_last_ms: i64,
    pub producer_last_ms: i64,
    pub destination_last_ms: i64,
}

/// Lock-free counters for one connector.
#[derive(Debug, Default)]
pub struct ConnectorStats {
    ddl_ops: AtomicU64,
    dml_ops: AtomicU64,
    reads: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    bad_events: AtomicU64,
    total_events: AtomicU64,
    batches: AtomicU64,

    src_first_ms: AtomicI64,
    producer_first_ms: AtomicI64,
    dst_first_ms: AtomicI64,
    src_last_ms: AtomicI64,
    producer_last_ms: AtomicI64,
    dst_last_ms: AtomicI64,
}

/// Copied-out view of [`ConnectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub ddl_ops: u64,
    pub dml_ops: u64,
    pub reads: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub bad_events: u64,
    pub total_events: u64,
    pub batches: u64,
    pub avg_batch_size: f64,
    pub last_batch: BatchMarks,
}

impl ConnectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_ddl(&self) {
        self.ddl_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one DML event by row operation letter (`r`, `c`, `u`, `d`).
    #[inline]
    pub fn record_dml(&self, op: char) {
        self.dml_ops.fetch_add(1, Ordering::Relaxed);
        let counter = match op {
            'r' => &self.reads,
            'c' => &self.inserts,
            'u' => &self.updates,
            'd' => &self.deletes,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bad_event(&self) {
        self.bad_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Start a new batch; resets the first-event marks.
    pub fn begin_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.src_first_ms.store(0, Ordering::Relaxed);
        self.producer_first_ms.store(0, Ordering::Relaxed);
        self.dst_first_ms.store(0, Ordering::Relaxed);
    }

    /// Record the latency marks of one applied event.
    ///
    /// `source_ms` is `payload.source.ts_ms`, `producer_ms` the envelope's
    /// `ts_ms`; the destination mark is taken from the wall clock.
    pub fn mark_event(&self, source_ms: Option<i64>, producer_ms: Option<i64>) {
        let dst_ms = epoch_millis();
        if let Some(src) = source_ms {
            if self.src_first_ms.load(Ordering::Relaxed) == 0 {
                self.src_first_ms.store(src, Ordering::Relaxed);
            }
            self.src_last_ms.store(src, Ordering::Relaxed);
        }
        if let Some(prod) = producer_ms {
            if self.producer_first_ms.load(Ordering::Relaxed) == 0 {
                self.producer_first_ms.store(prod, Ordering::Relaxed);
            }
            self.producer_last_ms.store(prod, Ordering::Relaxed);
        }
        if self.dst_first_ms.load(Ordering::Relaxed) == 0 {
            self.dst_first_ms.store(dst_ms, Ordering::Relaxed);
        }
        self.dst_last_ms.store(dst_ms, Ordering::Relaxed);
    }

    pub fn bad_events(&self) -> u64 {
        self.bad_events.load(Ordering::Relaxed)
    }

    pub fn total_events(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    /// Copy all counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total_events.load(Ordering::Relaxed);
        let batches = self.batches.load(Ordering::Relaxed);
        StatsSnapshot {
            ddl_ops: self.ddl_ops.load(Ordering::Relaxed),
            dml_ops: self.dml_ops.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            bad_events: self.bad_events.load(Ordering::Relaxed),
            total_events: total,
            batches,
            avg_batch_size: if batches == 0 {
                0.0
            } else {
                total as f64 / batches as f64
            },
            last_batch: BatchMarks {
                source_first_ms: self.src_first_ms.load(Ordering::Relaxed),
                producer_first_ms: self.producer_first_ms.load(Ordering::Relaxed),
                destination_first_ms: self.dst_first_ms.load(Ordering::Relaxed),
                source_last_ms: self.src_last_ms.load(Ordering::Relaxed),
                producer_last_ms: self.producer_last_ms.load(Ordering::Relaxed),
                destination_last_ms: self.dst_last_ms.load(Ordering::Relaxed),
            },
        }
    }
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dml_counters() {
        let stats = ConnectorStats::new();
        stats.record_dml('c');
        stats.record_dml('c');
        stats.record_dml('u');
        stats.record_dml('d');
        stats.record_dml('r');

        let snap = stats.snapshot();
        assert_eq!(snap.dml_ops, 5);
        assert_eq!(snap.inserts, 2);
        assert_eq!(snap.updates, 1);
        assert_eq!(snap.deletes, 1);
        assert_eq!(snap.reads, 1);
    }

    #[test]
    fn test_avg_batch_size() {
        let stats = ConnectorStats::new();
        stats.begin_batch();
        for _ in 0..3 {
            stats.record_event();
        }
        stats.begin_batch();
        stats.record_event();

        let snap = stats.snapshot();
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.total_events, 4);
        assert!((snap.avg_batch_size - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_avg_batch_size_no_batches() {
        let stats = ConnectorStats::new();
        assert_eq!(stats.snapshot().avg_batch_size, 0.0);
    }

    #[test]
    fn test_batch_marks_first_and_last() {
        let stats = ConnectorStats::new();
        stats.begin_batch();
        stats.mark_event(Some(100), Some(110));
        stats.mark_event(Some(200), Some(210));

        let marks = stats.snapshot().last_batch;
        assert_eq!(marks.source_first_ms, 100);
        assert_eq!(marks.source_last_ms, 200);
        assert_eq!(marks.producer_first_ms, 110);
        assert_eq!(marks.producer_last_ms, 210);
        assert!(marks.destination_first_ms > 0);
        assert!(marks.destination_last_ms >= marks.destination_first_ms);
    }

    #[test]
    fn test_new_batch_resets_first_marks() {
        let stats = ConnectorStats::new();
        stats.begin_batch();
        stats.mark_event(Some(100), None);
        stats.begin_batch();
        stats.mark_event(Some(500), None);

        let marks = stats.snapshot().last_batch;
        assert_eq!(marks.source_first_ms, 500);
    }
}
