use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Counters for the calculation loop, shared with whoever reports them
#[derive(Debug, Default)]
pub struct TickMetrics {
    ticks_completed: AtomicU64,
    ticks_failed: AtomicU64,
    rows_submitted: AtomicU64,
    rows_suppressed: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub rows_submitted: u64,
    pub rows_suppressed: u64,
    pub avg_tick_latency_us: u64,
}

impl TickMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    pub fn ticks_failed(&self) -> u64 {
        self.ticks_failed.load(Ordering::Relaxed)
    }

    pub fn rows_submitted(&self) -> u64 {
        self.rows_submitted.load(Ordering::Relaxed)
    }

    pub fn rows_suppressed(&self) -> u64 {
        self.rows_suppressed.load(Ordering::Relaxed)
    }

    pub fn start_tick(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_tick(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_tick(&self) {
        self.ticks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows(&self, submitted: usize, suppressed: usize) {
        self.rows_submitted.fetch_add(submitted as u64, Ordering::Relaxed);
        self.rows_suppressed.fetch_add(suppressed as u64, Ordering::Relaxed);
    }

    pub fn avg_tick_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_completed: self.ticks_completed(),
            ticks_failed: self.ticks_failed(),
            rows_submitted: self.rows_submitted(),
            rows_suppressed: self.rows_suppressed(),
            avg_tick_latency_us: self.avg_tick_latency_us(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = TickMetrics::new();
        let start = metrics.start_tick();
        metrics.finish_tick(start);
        metrics.record_failed_tick();
        metrics.record_rows(2, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ticks_completed, 1);
        assert_eq!(snapshot.ticks_failed, 1);
        assert_eq!(snapshot.rows_submitted, 2);
        assert_eq!(snapshot.rows_suppressed, 1);
    }

    #[test]
    fn test_avg_latency_without_samples() {
        assert_eq!(TickMetrics::new().avg_tick_latency_us(), 0);
    }
}
