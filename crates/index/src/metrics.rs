use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Counters shared by the chunk tasks of one build.
#[derive(Debug, Default)]
pub struct BuildMetrics {
    chunks_processed: AtomicUsize,
    chunks_failed: AtomicUsize,
    entities_new: AtomicUsize,
    entities_merged: AtomicUsize,
    relations_new: AtomicUsize,
    relations_merged: AtomicUsize,
    relations_dropped: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub entities_new: usize,
    pub entities_merged: usize,
    pub relations_new: usize,
    pub relations_merged: usize,
    pub relations_dropped: usize,
}

impl BuildMetrics {
    pub fn record_chunk(&self, success: bool) {
        if success {
            self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_entities(&self, new: usize, merged: usize) {
        self.entities_new.fetch_add(new, Ordering::Relaxed);
        self.entities_merged.fetch_add(merged, Ordering::Relaxed);
    }

    pub fn record_relations(&self, new: usize, merged: usize, dropped: usize) {
        self.relations_new.fetch_add(new, Ordering::Relaxed);
        self.relations_merged.fetch_add(merged, Ordering::Relaxed);
        self.relations_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            entities_new: self.entities_new.load(Ordering::Relaxed),
            entities_merged: self.entities_merged.load(Ordering::Relaxed),
            relations_new: self.relations_new.load(Ordering::Relaxed),
            relations_merged: self.relations_merged.load(Ordering::Relaxed),
            relations_dropped: self.relations_dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_accumulates() {
        let metrics = BuildMetrics::default();
        metrics.record_chunk(true);
        metrics.record_chunk(false);
        metrics.record_entities(2, 1);
        metrics.record_relations(1, 0, 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.chunks_processed, 1);
        assert_eq!(snapshot.chunks_failed, 1);
        assert_eq!(snapshot.entities_new, 2);
        assert_eq!(snapshot.entities_merged, 1);
        assert_eq!(snapshot.relations_dropped, 3);
    }
}
