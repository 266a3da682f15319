//! Counters for the hub
//!
//! Tracks delta flow through the synchronizers, resync activity, bus and
//! registry fan-out, and drops caused by bounded queues. Exported as a flat
//! name → value map by the gateway's metrics endpoint.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Core metrics for the hub.
pub struct HubMetrics {
    // Feed
    pub frames_received: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub feed_reconnects: AtomicU64,

    // Delta buffer
    pub deltas_buffered: AtomicU64,
    pub deltas_dropped_overflow: AtomicU64,

    // Synchronizer
    pub deltas_applied: AtomicU64,
    pub deltas_stale: AtomicU64,
    pub deltas_not_bracketing: AtomicU64,
    pub deltas_dropped_resync: AtomicU64,
    pub levels_skipped: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub resyncs_completed: AtomicU64,
    pub resets_published: AtomicU64,
    pub delta_apply_ns: Mutex<LatencyTracker>,

    // Snapshot fetches
    pub snapshot_fetches: AtomicU64,
    pub snapshot_fetch_failures: AtomicU64,

    // Event bus
    pub events_published: AtomicU64,
    pub events_dropped: AtomicU64,

    // Registry
    pub connected_sinks: AtomicU64,
    pub messages_broadcast: AtomicU64,
    pub messages_dropped_backpressure: AtomicU64,
    pub broadcast_ns: Mutex<LatencyTracker>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            feed_reconnects: AtomicU64::new(0),
            deltas_buffered: AtomicU64::new(0),
            deltas_dropped_overflow: AtomicU64::new(0),
            deltas_applied: AtomicU64::new(0),
            deltas_stale: AtomicU64::new(0),
            deltas_not_bracketing: AtomicU64::new(0),
            deltas_dropped_resync: AtomicU64::new(0),
            levels_skipped: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            resyncs_completed: AtomicU64::new(0),
            resets_published: AtomicU64::new(0),
            delta_apply_ns: Mutex::new(LatencyTracker::new(1000)),
            snapshot_fetches: AtomicU64::new(0),
            snapshot_fetch_failures: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            connected_sinks: AtomicU64::new(0),
            messages_broadcast: AtomicU64::new(0),
            messages_dropped_backpressure: AtomicU64::new(0),
            broadcast_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_frame(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.feed_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffered(&self) {
        self.deltas_buffered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delta dropped because the per-symbol buffer was full.
    pub fn record_overflow_drop(&self) {
        self.deltas_dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delta applied to a book.
    pub fn record_applied(&self, latency_ns: u64, skipped_levels: usize) {
        self.deltas_applied.fetch_add(1, Ordering::Relaxed);
        if skipped_levels > 0 {
            self.levels_skipped
                .fetch_add(skipped_levels as u64, Ordering::Relaxed);
        }
        self.delta_apply_ns.lock().record(latency_ns);
    }

    pub fn record_stale(&self) {
        self.deltas_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delta skipped because it does not bracket the snapshot.
    pub fn record_not_bracketing(&self) {
        self.deltas_not_bracketing.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delta discarded while a resync fetch or backoff was pending.
    pub fn record_resync_drop(&self) {
        self.deltas_dropped_resync.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed resync and the reset event it published.
    pub fn record_resync(&self) {
        self.resyncs_completed.fetch_add(1, Ordering::Relaxed);
        self.resets_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_fetch(&self, ok: bool) {
        self.snapshot_fetches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.snapshot_fetch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event evicted from a full topic queue.
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected_sinks(&self, count: u64) {
        self.connected_sinks.store(count, Ordering::Relaxed);
    }

    /// Record one broadcast fan-out.
    pub fn record_broadcast(&self, latency_ns: u64) {
        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        self.broadcast_ns.lock().record(latency_ns);
    }

    /// Record a message dropped due to backpressure.
    pub fn record_backpressure_drop(&self) {
        self.messages_dropped_backpressure
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters: [(&str, &AtomicU64); 20] = [
            ("frames_received", &self.frames_received),
            ("frames_malformed", &self.frames_malformed),
            ("feed_reconnects", &self.feed_reconnects),
            ("deltas_buffered", &self.deltas_buffered),
            ("deltas_dropped_overflow", &self.deltas_dropped_overflow),
            ("deltas_applied", &self.deltas_applied),
            ("deltas_stale", &self.deltas_stale),
            ("deltas_not_bracketing", &self.deltas_not_bracketing),
            ("deltas_dropped_resync", &self.deltas_dropped_resync),
            ("levels_skipped", &self.levels_skipped),
            ("gaps_detected", &self.gaps_detected),
            ("resyncs_completed", &self.resyncs_completed),
            ("resets_published", &self.resets_published),
            ("snapshot_fetches", &self.snapshot_fetches),
            ("snapshot_fetch_failures", &self.snapshot_fetch_failures),
            ("events_published", &self.events_published),
            ("events_dropped", &self.events_dropped),
            ("connected_sinks", &self.connected_sinks),
            ("messages_broadcast", &self.messages_broadcast),
            ("messages_dropped_backpressure", &self.messages_dropped_backpressure),
        ];

        let mut m: BTreeMap<String, u64> = counters
            .iter()
            .map(|(name, value)| (name.to_string(), value.load(Ordering::Relaxed)))
            .collect();

        let apply = self.delta_apply_ns.lock();
        if let (Some(p50), Some(p99)) = (apply.percentile(50), apply.percentile(99)) {
            m.insert("delta_apply_p50_ns".to_string(), p50);
            m.insert("delta_apply_p99_ns".to_string(), p99);
        }
        drop(apply);

        let broadcast = self.broadcast_ns.lock();
        if let Some(p99) = broadcast.percentile(99) {
            m.insert("broadcast_p99_ns".to_string(), p99);
        }
        m
    }
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HubMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.export()).finish()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: std::collections::VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: std::collections::VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a latency sample, evicting the oldest once full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Average latency.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_counters() {
        let metrics = HubMetrics::new();

        metrics.record_applied(500, 0);
        metrics.record_applied(1000, 2);
        metrics.record_stale();
        metrics.record_gap();

        let exported = metrics.export();
        assert_eq!(exported["deltas_applied"], 2);
        assert_eq!(exported["levels_skipped"], 2);
        assert_eq!(exported["deltas_stale"], 1);
        assert_eq!(exported["gaps_detected"], 1);
        assert!(exported.contains_key("delta_apply_p99_ns"));
    }

    #[test]
    fn test_snapshot_fetch_failures_counted() {
        let metrics = HubMetrics::new();
        metrics.record_snapshot_fetch(true);
        metrics.record_snapshot_fetch(false);

        let exported = metrics.export();
        assert_eq!(exported["snapshot_fetches"], 2);
        assert_eq!(exported["snapshot_fetch_failures"], 1);
    }

    #[test]
    fn test_export_without_samples_has_no_percentiles() {
        let exported = HubMetrics::new().export();
        assert!(!exported.contains_key("delta_apply_p50_ns"));
        assert!(!exported.contains_key("broadcast_p99_ns"));
        assert_eq!(exported["connected_sinks"], 0);
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);

        for i in 1..=100 {
            tracker.record(i);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);

        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40); // Should evict 10

        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.average().unwrap(), 30);
    }
}
