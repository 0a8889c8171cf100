//! Lock-free metrics collection and periodic reporting
//!
//! Counters are updated by the monitor task. The periodic log reads them
//! through `report()`, which resets the windowed histogram. The status
//! endpoint reads them through `snapshot()`, which resets nothing. Only the
//! last fix sits behind a mutex.
//!
//! Relaxed ordering throughout: these are statistics, never control flow.

use crate::domain::types::Position;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Last fix seen by the monitor, for the status endpoint
#[derive(Debug, Clone, Copy)]
pub struct FixSnapshot {
    pub position: Position,
    pub at: Instant,
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps the windowed counters. `snapshot()`
/// only loads.
pub struct Metrics {
    /// Monitor cycles run (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Cycles without a fix (monotonic)
    no_fix_total: AtomicU64,
    /// Position source errors and timeouts (monotonic)
    source_errors_total: AtomicU64,
    /// Candidates returned by the scanner (monotonic)
    candidates_total: AtomicU64,
    /// Alerts approved by the gate (monotonic)
    alerts_fired_total: AtomicU64,
    /// Alerts dropped by the cooldown (monotonic)
    alerts_suppressed_total: AtomicU64,
    /// Notifier failures and timeouts (monotonic)
    notify_failures_total: AtomicU64,
    /// Consecutive failed cycles (gauge)
    failure_streak: AtomicU64,
    /// Points in the store (gauge, set once)
    points_loaded: AtomicU64,
    /// Records skipped at load (gauge, set once)
    records_skipped: AtomicU64,
    /// Scan latency histogram buckets (reset on report)
    scan_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of scan latencies in microseconds (reset on report)
    scan_latency_sum_us: AtomicU64,
    /// Max scan latency in microseconds (reset on report)
    scan_latency_max_us: AtomicU64,
    /// Scan latency histogram since startup (monotonic)
    scan_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Sum of scan latencies since startup (monotonic)
    scan_latency_sum_total_us: AtomicU64,
    /// Last fix (written once per cycle, read by the status endpoint)
    last_fix: parking_lot::Mutex<Option<FixSnapshot>>,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            no_fix_total: AtomicU64::new(0),
            source_errors_total: AtomicU64::new(0),
            candidates_total: AtomicU64::new(0),
            alerts_fired_total: AtomicU64::new(0),
            alerts_suppressed_total: AtomicU64::new(0),
            notify_failures_total: AtomicU64::new(0),
            failure_streak: AtomicU64::new(0),
            points_loaded: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            scan_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            scan_latency_sum_us: AtomicU64::new(0),
            scan_latency_max_us: AtomicU64::new(0),
            scan_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            scan_latency_sum_total_us: AtomicU64::new(0),
            last_fix: parking_lot::Mutex::new(None),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record the database load (call once at startup)
    pub fn set_database(&self, points: usize, skipped: usize) {
        self.points_loaded.store(points as u64, Ordering::Relaxed);
        self.records_skipped.store(skipped as u64, Ordering::Relaxed);
    }

    pub fn record_cycle(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_fix(&self) {
        self.no_fix_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fix(&self, position: Position) {
        *self.last_fix.lock() = Some(FixSnapshot { position, at: Instant::now() });
    }

    /// Record one scan: its latency and how many candidates it returned
    pub fn record_scan(&self, latency_us: u64, candidates: usize) {
        self.candidates_total.fetch_add(candidates as u64, Ordering::Relaxed);
        self.scan_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.scan_latency_max_us, latency_us);
        self.scan_latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.scan_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.scan_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_fired(&self) {
        self.alerts_fired_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify_failure(&self) {
        self.notify_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_failure_streak(&self, streak: u32) {
        self.failure_streak.store(streak as u64, Ordering::Relaxed);
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn no_fix_total(&self) -> u64 {
        self.no_fix_total.load(Ordering::Relaxed)
    }

    pub fn source_errors_total(&self) -> u64 {
        self.source_errors_total.load(Ordering::Relaxed)
    }

    pub fn alerts_fired_total(&self) -> u64 {
        self.alerts_fired_total.load(Ordering::Relaxed)
    }

    pub fn alerts_suppressed_total(&self) -> u64 {
        self.alerts_suppressed_total.load(Ordering::Relaxed)
    }

    pub fn notify_failures_total(&self) -> u64 {
        self.notify_failures_total.load(Ordering::Relaxed)
    }

    pub fn last_fix(&self) -> Option<FixSnapshot> {
        *self.last_fix.lock()
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters and it has one caller,
    /// the periodic log. It uses atomic swap to get a consistent snapshot
    /// while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let cycles_count = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let scan_sum = self.scan_latency_sum_us.swap(0, Ordering::Relaxed);
        let scan_max = self.scan_latency_max_us.swap(0, Ordering::Relaxed);
        let scan_buckets = swap_buckets(&self.scan_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(cycles_count, elapsed, scan_buckets, scan_sum, scan_max)
    }

    /// Summary for scrapers, leaving every counter in place
    ///
    /// The histogram covers all scans since startup so repeated scrapes see
    /// monotonic buckets. The rate and the max cover the current report window.
    pub fn snapshot(&self) -> MetricsSummary {
        let cycles_count = self.cycles_since_report.load(Ordering::Relaxed);
        let scan_sum = self.scan_latency_sum_total_us.load(Ordering::Relaxed);
        let scan_max = self.scan_latency_max_us.load(Ordering::Relaxed);
        let scan_buckets = load_buckets(&self.scan_latency_buckets_total);
        let elapsed = self.last_report_time.lock().elapsed();

        self.summarize(cycles_count, elapsed, scan_buckets, scan_sum, scan_max)
    }

    fn summarize(
        &self,
        cycles_count: u64,
        elapsed: Duration,
        scan_buckets: [u64; NUM_BUCKETS],
        scan_sum: u64,
        scan_max: u64,
    ) -> MetricsSummary {
        let scans: u64 = scan_buckets.iter().sum();
        let cycles_per_min = if elapsed.as_secs_f64() > 0.0 {
            cycles_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let last_fix = self.last_fix();

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_min,
            no_fix_total: self.no_fix_total.load(Ordering::Relaxed),
            source_errors_total: self.source_errors_total.load(Ordering::Relaxed),
            candidates_total: self.candidates_total.load(Ordering::Relaxed),
            alerts_fired_total: self.alerts_fired_total.load(Ordering::Relaxed),
            alerts_suppressed_total: self.alerts_suppressed_total.load(Ordering::Relaxed),
            notify_failures_total: self.notify_failures_total.load(Ordering::Relaxed),
            failure_streak: self.failure_streak.load(Ordering::Relaxed),
            points_loaded: self.points_loaded.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            scan_buckets,
            scan_avg_us: if scans > 0 { scan_sum / scans } else { 0 },
            scan_max_us: scan_max,
            scan_p99_us: percentile_from_buckets(&scan_buckets, 0.99),
            last_fix: last_fix.map(|f| f.position),
            last_fix_age: last_fix.map(|f| f.at.elapsed()),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the status endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_per_min: f64,
    pub no_fix_total: u64,
    pub source_errors_total: u64,
    pub candidates_total: u64,
    pub alerts_fired_total: u64,
    pub alerts_suppressed_total: u64,
    pub notify_failures_total: u64,
    pub failure_streak: u64,
    pub points_loaded: u64,
    pub records_skipped: u64,
    /// Scan latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub scan_buckets: [u64; NUM_BUCKETS],
    pub scan_avg_us: u64,
    pub scan_max_us: u64,
    pub scan_p99_us: u64,
    pub last_fix: Option<Position>,
    pub last_fix_age: Option<Duration>,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles_per_min = format!("{:.1}", self.cycles_per_min),
            no_fix_total = %self.no_fix_total,
            source_errors = %self.source_errors_total,
            alerts_fired = %self.alerts_fired_total,
            alerts_suppressed = %self.alerts_suppressed_total,
            notify_failures = %self.notify_failures_total,
            scan_avg_us = %self.scan_avg_us,
            scan_p99_us = %self.scan_p99_us,
            last_fix_age_s = ?self.last_fix_age.map(|d| d.as_secs()),
            "metrics"
        );
    }
}
