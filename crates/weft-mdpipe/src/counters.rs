//! Flow and latency counters shared by all workers.
//!
//! A single block of atomic u64s; every field has exactly one writer node,
//! so relaxed ordering is sufficient everywhere. Snapshots are plain
//! struct copies of relaxed loads and may mix values from different
//! instants.

use std::sync::atomic::{AtomicU64, Ordering};

/// The shared counter block.
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    /// Ticks forwarded by md.
    pub md_ticks_sent: AtomicU64,
    /// Ticks consumed by strat.
    pub strat_ticks_seen: AtomicU64,
    /// Orders emitted by strat.
    pub strat_orders_sent: AtomicU64,
    /// Acks consumed by strat.
    pub strat_acks_seen: AtomicU64,
    /// Orders consumed by the router.
    pub or_orders_seen: AtomicU64,
    /// Acks emitted by the router.
    pub or_acks_sent: AtomicU64,

    /// Tick one-way latency sample count (strat).
    pub tick_one_way_count: AtomicU64,
    /// Tick one-way latency sum, nanoseconds.
    pub tick_one_way_sum_ns: AtomicU64,
    /// Tick one-way latency maximum, nanoseconds.
    pub tick_one_way_max_ns: AtomicU64,

    /// Order round-trip sample count (strat).
    pub order_rtt_count: AtomicU64,
    /// Order round-trip sum, nanoseconds.
    pub order_rtt_sum_ns: AtomicU64,
    /// Order round-trip maximum, nanoseconds.
    pub order_rtt_max_ns: AtomicU64,

    /// Ticks that arrived at strat carrying a live trace.
    pub trace_ticks_seen: AtomicU64,
    /// Acks that arrived at strat carrying a live trace.
    pub trace_acks_seen: AtomicU64,
}

impl RuntimeCounters {
    /// Copies every counter with relaxed loads.
    ///
    /// Fields may be mutually inconsistent; the snapshot is not an atomic
    /// view of the block.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            md_ticks_sent: self.md_ticks_sent.load(Ordering::Relaxed),
            strat_ticks_seen: self.strat_ticks_seen.load(Ordering::Relaxed),
            strat_orders_sent: self.strat_orders_sent.load(Ordering::Relaxed),
            strat_acks_seen: self.strat_acks_seen.load(Ordering::Relaxed),
            or_orders_seen: self.or_orders_seen.load(Ordering::Relaxed),
            or_acks_sent: self.or_acks_sent.load(Ordering::Relaxed),
            tick_one_way_count: self.tick_one_way_count.load(Ordering::Relaxed),
            tick_one_way_sum_ns: self.tick_one_way_sum_ns.load(Ordering::Relaxed),
            tick_one_way_max_ns: self.tick_one_way_max_ns.load(Ordering::Relaxed),
            order_rtt_count: self.order_rtt_count.load(Ordering::Relaxed),
            order_rtt_sum_ns: self.order_rtt_sum_ns.load(Ordering::Relaxed),
            order_rtt_max_ns: self.order_rtt_max_ns.load(Ordering::Relaxed),
            trace_ticks_seen: self.trace_ticks_seen.load(Ordering::Relaxed),
            trace_acks_seen: self.trace_acks_seen.load(Ordering::Relaxed),
        }
    }
}

/// Raises `target` to `value` if larger. Relaxed CAS is enough: each max
/// counter has a single writer.
pub fn update_max(target: &AtomicU64, value: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while current < value {
        match target.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

/// A plain copy of every counter plus derived averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Ticks forwarded by md.
    pub md_ticks_sent: u64,
    /// Ticks consumed by strat.
    pub strat_ticks_seen: u64,
    /// Orders emitted by strat.
    pub strat_orders_sent: u64,
    /// Acks consumed by strat.
    pub strat_acks_seen: u64,
    /// Orders consumed by the router.
    pub or_orders_seen: u64,
    /// Acks emitted by the router.
    pub or_acks_sent: u64,

    /// Tick one-way latency sample count.
    pub tick_one_way_count: u64,
    /// Tick one-way latency sum, nanoseconds.
    pub tick_one_way_sum_ns: u64,
    /// Tick one-way latency maximum, nanoseconds.
    pub tick_one_way_max_ns: u64,

    /// Order round-trip sample count.
    pub order_rtt_count: u64,
    /// Order round-trip sum, nanoseconds.
    pub order_rtt_sum_ns: u64,
    /// Order round-trip maximum, nanoseconds.
    pub order_rtt_max_ns: u64,

    /// Ticks seen with a live trace.
    pub trace_ticks_seen: u64,
    /// Acks seen with a live trace.
    pub trace_acks_seen: u64,
}

impl StatsSnapshot {
    /// Average tick one-way latency in nanoseconds, 0.0 without samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tick_one_way_avg_ns(&self) -> f64 {
        if self.tick_one_way_count == 0 {
            return 0.0;
        }
        self.tick_one_way_sum_ns as f64 / self.tick_one_way_count as f64
    }

    /// Average order round-trip in nanoseconds, 0.0 without samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn order_rtt_avg_ns(&self) -> f64 {
        if self.order_rtt_count == 0 {
            return 0.0;
        }
        self.order_rtt_sum_ns as f64 / self.order_rtt_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_max() {
        let max = AtomicU64::new(0);

        update_max(&max, 10);
        assert_eq!(max.load(Ordering::Relaxed), 10);

        update_max(&max, 5);
        assert_eq!(max.load(Ordering::Relaxed), 10);

        update_max(&max, 11);
        assert_eq!(max.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_snapshot_copies_fields() {
        let counters = RuntimeCounters::default();
        counters.md_ticks_sent.store(3, Ordering::Relaxed);
        counters.trace_acks_seen.store(7, Ordering::Relaxed);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.md_ticks_sent, 3);
        assert_eq!(snapshot.trace_acks_seen, 7);
        assert_eq!(snapshot.strat_ticks_seen, 0);
    }

    #[test]
    fn test_lazy_averages() {
        let mut snapshot = StatsSnapshot::default();
        assert_eq!(snapshot.tick_one_way_avg_ns(), 0.0);
        assert_eq!(snapshot.order_rtt_avg_ns(), 0.0);

        snapshot.tick_one_way_count = 4;
        snapshot.tick_one_way_sum_ns = 100;
        assert_eq!(snapshot.tick_one_way_avg_ns(), 25.0);

        snapshot.order_rtt_count = 2;
        snapshot.order_rtt_sum_ns = 9;
        assert_eq!(snapshot.order_rtt_avg_ns(), 4.5);
    }
}
