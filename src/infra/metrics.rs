//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::{BarrierState, LaneRole};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Barrier state values for the Prometheus gauge
pub const BARRIER_GAUGE_CLOSED: u64 = 0;
pub const BARRIER_GAUGE_OPEN: u64 = 1;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total controller ticks ever run, both lanes (monotonic)
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    /// Sum of tick latencies in microseconds (reset on report)
    tick_latency_sum_us: AtomicU64,
    /// Max tick latency in microseconds (reset on report)
    tick_latency_max_us: AtomicU64,
    /// Tick latency histogram buckets (reset on report)
    tick_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Failed hardware sensor reads (monotonic)
    sensor_read_failures: AtomicU64,
    /// Failed camera captures (monotonic)
    capture_failures: AtomicU64,
    /// Recognition attempts (monotonic)
    recognitions_total: AtomicU64,
    /// Recognition attempts that found no plate (monotonic)
    recognition_misses: AtomicU64,
    /// Admissions that opened the barrier (monotonic)
    admissions_granted: AtomicU64,
    /// Admissions refused (no plate or fee unpaid) (monotonic)
    admissions_denied: AtomicU64,
    /// Completed opening sweeps (monotonic)
    barrier_opens: AtomicU64,
    /// Completed closing sweeps (monotonic)
    barrier_closes: AtomicU64,
    /// Closing sweeps aborted on a persistent obstruction (monotonic)
    close_obstructions: AtomicU64,
    /// Entry records committed (monotonic)
    entries_recorded: AtomicU64,
    /// Exit records committed (monotonic)
    exits_recorded: AtomicU64,
    /// Barrier state gauges (0 closed, 1 open)
    entrance_barrier_state: AtomicU64,
    exit_barrier_state: AtomicU64,
    /// Currently parked vehicles (gauge)
    vehicles_parked: AtomicU64,
    /// Timestamp of the last report, for rate computation
    last_report: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            tick_latency_sum_us: AtomicU64::new(0),
            tick_latency_max_us: AtomicU64::new(0),
            tick_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sensor_read_failures: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            recognitions_total: AtomicU64::new(0),
            recognition_misses: AtomicU64::new(0),
            admissions_granted: AtomicU64::new(0),
            admissions_denied: AtomicU64::new(0),
            barrier_opens: AtomicU64::new(0),
            barrier_closes: AtomicU64::new(0),
            close_obstructions: AtomicU64::new(0),
            entries_recorded: AtomicU64::new(0),
            exits_recorded: AtomicU64::new(0),
            entrance_barrier_state: AtomicU64::new(BARRIER_GAUGE_CLOSED),
            exit_barrier_state: AtomicU64::new(BARRIER_GAUGE_CLOSED),
            vehicles_parked: AtomicU64::new(0),
            last_report: Mutex::new(Instant::now()),
        }
    }

    pub fn record_tick(&self, latency_us: u64) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.tick_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.tick_latency_max_us, latency_us);
        self.tick_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_read_failure(&self) {
        self.sensor_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recognition(&self, hit: bool) {
        self.recognitions_total.fetch_add(1, Ordering::Relaxed);
        if !hit {
            self.recognition_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_admission(&self, granted: bool) {
        if granted {
            self.admissions_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.admissions_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_barrier_open(&self) {
        self.barrier_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_barrier_close(&self) {
        self.barrier_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close_obstruction(&self) {
        self.close_obstructions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry(&self) {
        self.entries_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit(&self) {
        self.exits_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_barrier_state(&self, lane: LaneRole, state: BarrierState) {
        let value = match state {
            BarrierState::Closed => BARRIER_GAUGE_CLOSED,
            BarrierState::Open => BARRIER_GAUGE_OPEN,
        };
        match lane {
            LaneRole::Entrance => self.entrance_barrier_state.store(value, Ordering::Relaxed),
            LaneRole::Exit => self.exit_barrier_state.store(value, Ordering::Relaxed),
        }
    }

    pub fn barrier_state_gauge(&self, lane: LaneRole) -> u64 {
        match lane {
            LaneRole::Entrance => self.entrance_barrier_state.load(Ordering::Relaxed),
            LaneRole::Exit => self.exit_barrier_state.load(Ordering::Relaxed),
        }
    }

    pub fn set_vehicles_parked(&self, count: usize) {
        self.vehicles_parked.store(count as u64, Ordering::Relaxed);
    }

    /// Produce a snapshot and reset the per-interval counters
    pub fn report(&self) -> MetricsSummary {
        let mut last_report = self.last_report.lock();
        let elapsed = last_report.elapsed();
        *last_report = Instant::now();
        drop(last_report);

        let ticks = self.ticks_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.tick_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.tick_latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.tick_latency_buckets);

        let ticks_per_sec = if elapsed.as_secs_f64() > 0.0 {
            ticks as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if ticks > 0 { latency_sum / ticks } else { 0 };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_sec,
            avg_tick_latency_us: avg_latency,
            max_tick_latency_us: latency_max,
            tick_lat_buckets: buckets,
            tick_lat_p50_us: percentile_from_buckets(&buckets, 0.50),
            tick_lat_p95_us: percentile_from_buckets(&buckets, 0.95),
            tick_lat_p99_us: percentile_from_buckets(&buckets, 0.99),
            sensor_read_failures: self.sensor_read_failures.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            recognitions_total: self.recognitions_total.load(Ordering::Relaxed),
            recognition_misses: self.recognition_misses.load(Ordering::Relaxed),
            admissions_granted: self.admissions_granted.load(Ordering::Relaxed),
            admissions_denied: self.admissions_denied.load(Ordering::Relaxed),
            barrier_opens: self.barrier_opens.load(Ordering::Relaxed),
            barrier_closes: self.barrier_closes.load(Ordering::Relaxed),
            close_obstructions: self.close_obstructions.load(Ordering::Relaxed),
            entries_recorded: self.entries_recorded.load(Ordering::Relaxed),
            exits_recorded: self.exits_recorded.load(Ordering::Relaxed),
            entrance_barrier_state: self.entrance_barrier_state.load(Ordering::Relaxed),
            exit_barrier_state: self.exit_barrier_state.load(Ordering::Relaxed),
            vehicles_parked: self.vehicles_parked.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot produced by `Metrics::report()`
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_sec: f64,
    pub avg_tick_latency_us: u64,
    pub max_tick_latency_us: u64,
    pub tick_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub tick_lat_p50_us: u64,
    pub tick_lat_p95_us: u64,
    pub tick_lat_p99_us: u64,
    pub sensor_read_failures: u64,
    pub capture_failures: u64,
    pub recognitions_total: u64,
    pub recognition_misses: u64,
    pub admissions_granted: u64,
    pub admissions_denied: u64,
    pub barrier_opens: u64,
    pub barrier_closes: u64,
    pub close_obstructions: u64,
    pub entries_recorded: u64,
    pub exits_recorded: u64,
    pub entrance_barrier_state: u64,
    pub exit_barrier_state: u64,
    pub vehicles_parked: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured event
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_sec = format!("{:.2}", self.ticks_per_sec),
            avg_tick_us = %self.avg_tick_latency_us,
            max_tick_us = %self.max_tick_latency_us,
            p99_tick_us = %self.tick_lat_p99_us,
            sensor_read_failures = %self.sensor_read_failures,
            capture_failures = %self.capture_failures,
            recognition_misses = %self.recognition_misses,
            admissions_granted = %self.admissions_granted,
            admissions_denied = %self.admissions_denied,
            barrier_opens = %self.barrier_opens,
            barrier_closes = %self.barrier_closes,
            close_obstructions = %self.close_obstructions,
            entries = %self.entries_recorded,
            exits = %self.exits_recorded,
            parked = %self.vehicles_parked,
            "metrics_report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(100_000), 10);
    }

    #[test]
    fn test_record_tick_and_report() {
        let metrics = Metrics::new();
        metrics.record_tick(150);
        metrics.record_tick(250);
        metrics.record_tick(90);

        let summary = metrics.report();
        assert_eq!(summary.ticks_total, 3);
        assert_eq!(summary.avg_tick_latency_us, (150 + 250 + 90) / 3);
        assert_eq!(summary.max_tick_latency_us, 250);

        // Interval counters reset on report; totals are monotonic
        let summary2 = metrics.report();
        assert_eq!(summary2.ticks_total, 3);
        assert_eq!(summary2.avg_tick_latency_us, 0);
        assert_eq!(summary2.max_tick_latency_us, 0);
    }

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_admission(true);
        metrics.record_admission(false);
        metrics.record_admission(false);
        metrics.record_barrier_open();
        metrics.record_close_obstruction();
        metrics.record_entry();
        metrics.record_recognition(true);
        metrics.record_recognition(false);

        let summary = metrics.report();
        assert_eq!(summary.admissions_granted, 1);
        assert_eq!(summary.admissions_denied, 2);
        assert_eq!(summary.barrier_opens, 1);
        assert_eq!(summary.close_obstructions, 1);
        assert_eq!(summary.entries_recorded, 1);
        assert_eq!(summary.recognitions_total, 2);
        assert_eq!(summary.recognition_misses, 1);
    }

    #[test]
    fn test_barrier_state_gauge() {
        let metrics = Metrics::new();
        assert_eq!(metrics.barrier_state_gauge(LaneRole::Entrance), BARRIER_GAUGE_CLOSED);

        metrics.set_barrier_state(LaneRole::Entrance, BarrierState::Open);
        assert_eq!(metrics.barrier_state_gauge(LaneRole::Entrance), BARRIER_GAUGE_OPEN);
        assert_eq!(metrics.barrier_state_gauge(LaneRole::Exit), BARRIER_GAUGE_CLOSED);

        metrics.set_barrier_state(LaneRole::Entrance, BarrierState::Closed);
        assert_eq!(metrics.barrier_state_gauge(LaneRole::Entrance), BARRIER_GAUGE_CLOSED);
    }

    #[test]
    fn test_percentiles_empty() {
        let buckets = [0u64; METRICS_NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 0);
    }
}
