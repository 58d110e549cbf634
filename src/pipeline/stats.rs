//! Pipeline counters
//!
//! Shared between request handlers and writer workers. Rendered at
//! `/metrics` in the Prometheus text format.

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated along the ingestion path
#[derive(Debug, Default)]
pub struct PipelineStats {
    batches_accepted: AtomicU64,
    batches_rejected: AtomicU64,
    batches_persisted: AtomicU64,
    batches_failed: AtomicU64,
    events_persisted: AtomicU64,
    events_dropped: AtomicU64,
    timestamp_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub batches_accepted: u64,
    pub batches_rejected: u64,
    pub batches_persisted: u64,
    pub batches_failed: u64,
    pub events_persisted: u64,
    pub events_dropped: u64,
    pub timestamp_fallbacks: u64,
}

/// Queue and pool gauges sampled at render time
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineGauges {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub workers: usize,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.batches_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, events: u64) {
        self.batches_persisted.fetch_add(1, Ordering::Relaxed);
        self.events_persisted.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Events excluded by normalization
    pub fn record_dropped(&self, events: u64) {
        self.events_dropped.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_timestamp_fallbacks(&self, events: u64) {
        self.timestamp_fallbacks.fetch_add(events, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_accepted: self.batches_accepted.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            batches_persisted: self.batches_persisted.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            timestamp_fallbacks: self.timestamp_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Render counters and gauges in the Prometheus text format
    pub fn render_prometheus(&self, gauges: PipelineGauges) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let counters = [
            (
                "eventsink_batches_accepted_total",
                "Batches accepted into the queue",
                snapshot.batches_accepted,
            ),
            (
                "eventsink_batches_rejected_total",
                "Batches rejected because the queue stayed full",
                snapshot.batches_rejected,
            ),
            (
                "eventsink_batches_persisted_total",
                "Batches written to the store",
                snapshot.batches_persisted,
            ),
            (
                "eventsink_batches_failed_total",
                "Batches lost to a store failure",
                snapshot.batches_failed,
            ),
            (
                "eventsink_events_persisted_total",
                "Events written to the store",
                snapshot.events_persisted,
            ),
            (
                "eventsink_events_dropped_total",
                "Events excluded by validation",
                snapshot.events_dropped,
            ),
            (
                "eventsink_timestamp_fallbacks_total",
                "Events stored with the receipt time instead of a bad timestamp",
                snapshot.timestamp_fallbacks,
            ),
        ];

        for (name, help, value) in counters {
            let _ = write!(
                out,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            );
        }

        let gauges = [
            ("eventsink_queue_depth", "Batches waiting in the queue", gauges.queue_depth),
            ("eventsink_queue_capacity", "Queue capacity", gauges.queue_capacity),
            ("eventsink_writer_workers", "Writer workers started", gauges.workers),
        ];

        for (name, help, value) in gauges {
            let _ = write!(
                out,
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_rejected();
        stats.record_persisted(5);
        stats.record_failed();
        stats.record_dropped(2);
        stats.record_timestamp_fallbacks(1);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                batches_accepted: 2,
                batches_rejected: 1,
                batches_persisted: 1,
                batches_failed: 1,
                events_persisted: 5,
                events_dropped: 2,
                timestamp_fallbacks: 1,
            }
        );
    }

    #[test]
    fn test_render_prometheus() {
        let stats = PipelineStats::new();
        stats.record_persisted(3);

        let text = stats.render_prometheus(PipelineGauges {
            queue_depth: 4,
            queue_capacity: 100,
            workers: 8,
        });

        assert!(text.contains("# TYPE eventsink_events_persisted_total counter"));
        assert!(text.contains("eventsink_events_persisted_total 3\n"));
        assert!(text.contains("eventsink_queue_depth 4\n"));
        assert!(text.contains("eventsink_queue_capacity 100\n"));
        assert!(text.contains("eventsink_writer_workers 8\n"));
    }
}
