//! Position monitoring loop
//!
//! One sequential task: poll the position source, scan the store, pass
//! each candidate through the alert gate nearest first, dispatch approved
//! alerts. Cycles never overlap. Every external call is bounded by a
//! timeout, and no single failure stops the loop.

use crate::domain::error::SentinelError;
use crate::domain::types::Position;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::{Notifier, PositionSource};
use crate::services::alert_gate::{AlertGate, GateDecision};
use crate::services::backoff::Backoff;
use crate::services::point_store::PointStore;
use crate::services::scanner::ProximityScanner;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Tunables for the monitor loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub radius_m: f64,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub notify_timeout: Duration,
    pub error_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_steps: u32,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            radius_m: config.detection_radius_m(),
            cooldown: config.cooldown(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            notify_timeout: config.notify_timeout(),
            error_backoff: config.error_backoff(),
            max_backoff: config.max_backoff(),
            backoff_steps: config.backoff_steps(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What happened in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No fix (or the poll timed out); cycle skipped
    NoFix,
    /// The position source reported a device error; treated as no fix
    SourceError,
    Scanned {
        candidates: usize,
        /// Approved by the gate (dispatch attempted)
        fired: usize,
        suppressed: usize,
        /// Dispatches that failed or timed out
        failed: usize,
    },
}

impl CycleOutcome {
    /// Failed cycles lengthen the delay before the next one
    pub fn is_failure(&self) -> bool {
        match self {
            CycleOutcome::NoFix => false,
            CycleOutcome::SourceError => true,
            CycleOutcome::Scanned { failed, .. } => *failed > 0,
        }
    }
}

/// Totals returned when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub cycles: u64,
    pub alerts_fired: u64,
}

pub struct MonitorLoop<S, N> {
    store: Arc<PointStore>,
    scanner: ProximityScanner,
    gate: AlertGate,
    backoff: Backoff,
    source: S,
    notifier: N,
    metrics: Arc<Metrics>,
    poll_timeout: Duration,
    notify_timeout: Duration,
}

impl<S, N> MonitorLoop<S, N>
where
    S: PositionSource,
    N: Notifier,
{
    pub fn new(
        store: Arc<PointStore>,
        settings: MonitorSettings,
        source: S,
        notifier: N,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            scanner: ProximityScanner::new(settings.radius_m),
            gate: AlertGate::new(settings.cooldown),
            backoff: Backoff::new(
                settings.poll_interval,
                settings.error_backoff,
                settings.max_backoff,
                settings.backoff_steps,
            ),
            source,
            notifier,
            metrics,
            poll_timeout: settings.poll_timeout,
            notify_timeout: settings.notify_timeout,
        }
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    /// Run cycles until the shutdown flag is set, then release the notifier
    /// and the position source, in that order.
    ///
    /// A cycle in progress when shutdown arrives is completed first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MonitorSummary {
        info!(
            points = %self.store.len(),
            radius_m = %self.scanner.radius_m(),
            cooldown_s = %self.gate.cooldown().as_secs(),
            "monitor_started"
        );

        let mut summary = MonitorSummary::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.run_cycle().await;
            summary.cycles += 1;
            if let CycleOutcome::Scanned { fired, .. } = outcome {
                summary.alerts_fired += fired as u64;
            }

            let delay = if outcome.is_failure() {
                let delay = self.backoff.on_failure();
                warn!(
                    failures = %self.backoff.failures(),
                    delay_ms = %delay.as_millis(),
                    "monitor_backoff"
                );
                delay
            } else {
                self.backoff.on_success()
            };
            self.metrics.set_failure_streak(self.backoff.failures());

            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        info!(cycles = %summary.cycles, alerts = %summary.alerts_fired, "monitor_stopping");
        self.notifier.close().await;
        self.source.close().await;
        info!("monitor_stopped");

        summary
    }

    /// Run a single poll, scan and dispatch cycle
    ///
    /// Cooldowns are stamped with the time the fix arrived, not the time the
    /// poll started. The clock is tokio's, so paused-time tests drive it.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.metrics.record_cycle();

        let position = match self.poll_position().await {
            Ok(position) => position,
            Err(outcome) => return outcome,
        };
        let now = tokio::time::Instant::now().into_std();

        self.metrics.record_fix(position);
        debug!(lat = %position.lat, lon = %position.lon, "position_fix");

        let store = Arc::clone(&self.store);
        let scan_start = Instant::now();
        let candidates = self.scanner.scan(&store, position);
        self.metrics.record_scan(scan_start.elapsed().as_micros() as u64, candidates.len());

        let mut fired = 0;
        let mut suppressed = 0;
        let mut failed = 0;

        for candidate in &candidates {
            let id = &candidate.point.id;
            match self.gate.fire(id, now) {
                GateDecision::Suppressed { remaining } => {
                    trace!(id = %id, remaining_s = %remaining.as_secs(), "alert_cooldown");
                    self.metrics.record_alert_suppressed();
                    suppressed += 1;
                }
                GateDecision::Fired => {
                    let payload = candidate.to_payload();
                    info!(
                        id = %payload.point_id,
                        distance_m = %payload.distance_m,
                        limit = %payload.limit,
                        "radar_alert"
                    );
                    self.metrics.record_alert_fired();
                    fired += 1;

                    let result =
                        match tokio::time::timeout(self.notify_timeout, self.notifier.notify(&payload))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(SentinelError::notify_failed(
                                &payload.point_id,
                                format!("timed out after {}ms", self.notify_timeout.as_millis()),
                            )),
                        };

                    if let Err(e) = result {
                        error!(id = %payload.point_id, error = %e, "alert_notify_failed");
                        self.metrics.record_notify_failure();
                        failed += 1;
                    }
                }
            }
        }

        CycleOutcome::Scanned { candidates: candidates.len(), fired, suppressed, failed }
    }

    /// Poll the source within the timeout. `Err` carries the outcome of a
    /// cycle that ends without a fix.
    async fn poll_position(&mut self) -> Result<Position, CycleOutcome> {
        match tokio::time::timeout(self.poll_timeout, self.source.poll(self.poll_timeout)).await {
            Ok(Ok(Some(position))) => Ok(position),
            Ok(Ok(None)) => {
                info!("no_fix_cycle_skipped");
                self.metrics.record_no_fix();
                Err(CycleOutcome::NoFix)
            }
            Ok(Err(e)) => {
                warn!(error = %e, kind = %e.kind(), "position_source_error");
                self.metrics.record_source_error();
                Err(CycleOutcome::SourceError)
            }
            Err(_) => {
                warn!(timeout_ms = %self.poll_timeout.as_millis(), "position_poll_timeout");
                self.metrics.record_no_fix();
                Err(CycleOutcome::NoFix)
            }
        }
    }
}

/// Sleep for `delay`, returning early with `true` if shutdown is requested
/// or the shutdown sender is gone.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("monitor_shutdown");
                    return true;
                }
            }
        }
    }
}
