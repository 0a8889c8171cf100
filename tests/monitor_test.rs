//! Integration tests for the monitor loop with scripted devices

use async_trait::async_trait;
use parking_lot::Mutex;
use radar_sentinel::domain::{AlertPayload, PointId, Position, SentinelError};
use radar_sentinel::infra::Metrics;
use radar_sentinel::io::{Notifier, PositionSource};
use radar_sentinel::services::alert_gate::AlertState;
use radar_sentinel::services::{CycleOutcome, MonitorLoop, MonitorSettings, PointStore, RawRecord};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Shared event log: notifications and close calls, in order
type EventLog = Arc<Mutex<Vec<String>>>;

enum Step {
    Fix(f64, f64),
    /// Fix delivered after the given number of seconds
    SlowFix(u64, f64, f64),
    NoFix,
    Fail,
    Hang,
}

/// Replays a script, then requests shutdown and reports no fix
struct ScriptedSource {
    steps: VecDeque<Step>,
    log: EventLog,
    poll_times: Arc<Mutex<Vec<Instant>>>,
    shutdown: Option<Arc<watch::Sender<bool>>>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>, log: EventLog) -> Self {
        Self { steps: steps.into(), log, poll_times: Arc::new(Mutex::new(Vec::new())), shutdown: None }
    }

    fn with_shutdown(mut self, tx: Arc<watch::Sender<bool>>) -> Self {
        self.shutdown = Some(tx);
        self
    }
}

#[async_trait]
impl PositionSource for ScriptedSource {
    async fn poll(&mut self, _timeout: Duration) -> Result<Option<Position>, SentinelError> {
        self.poll_times.lock().push(Instant::now());
        match self.steps.pop_front() {
            Some(Step::Fix(lat, lon)) => Ok(Some(Position::new(lat, lon))),
            Some(Step::SlowFix(secs, lat, lon)) => {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok(Some(Position::new(lat, lon)))
            }
            Some(Step::NoFix) => Ok(None),
            Some(Step::Fail) => Err(SentinelError::unavailable("gpsd", "connection refused")),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
            None => {
                if let Some(tx) = &self.shutdown {
                    let _ = tx.send(true);
                }
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.log.lock().push("close:source".to_string());
    }
}

#[derive(Clone, Copy)]
enum NotifyMode {
    Ok,
    Fail,
    Hang,
}

struct RecordingNotifier {
    mode: NotifyMode,
    log: EventLog,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&mut self, alert: &AlertPayload) -> Result<(), SentinelError> {
        self.log.lock().push(format!("notify:{}:{}:{}", alert.point_id, alert.distance_m, alert.limit));
        match self.mode {
            NotifyMode::Ok => Ok(()),
            NotifyMode::Fail => Err(SentinelError::notify_failed(&alert.point_id, "aplay exited with 1")),
            NotifyMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        self.log.lock().push("close:notifier".to_string());
    }
}

// 0.0018 degrees of latitude is about 200 m
const BASE_LAT: f64 = 48.8566;
const BASE_LON: f64 = 2.3522;

fn store(points: &[(&str, f64, i32)]) -> Arc<PointStore> {
    let records = points.iter().map(|(id, lat_offset, limit)| {
        RawRecord::new(id, &(BASE_LAT + lat_offset).to_string(), &BASE_LON.to_string(), &limit.to_string())
    });
    Arc::new(PointStore::from_records(records).0)
}

fn settings() -> MonitorSettings {
    MonitorSettings {
        radius_m: 300.0,
        cooldown: Duration::from_secs(30),
        poll_interval: Duration::from_secs(2),
        poll_timeout: Duration::from_secs(10),
        notify_timeout: Duration::from_secs(30),
        error_backoff: Duration::from_secs(5),
        max_backoff: Duration::from_secs(60),
        backoff_steps: 4,
    }
}

fn notifications(log: &EventLog) -> Vec<String> {
    log.lock().iter().filter(|e| e.starts_with("notify:")).cloned().collect()
}

fn monitor(
    points: Arc<PointStore>,
    steps: Vec<Step>,
    mode: NotifyMode,
    log: &EventLog,
) -> (MonitorLoop<ScriptedSource, RecordingNotifier>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let source = ScriptedSource::new(steps, log.clone());
    let notifier = RecordingNotifier { mode, log: log.clone() };
    (MonitorLoop::new(points, settings(), source, notifier, metrics.clone()), metrics)
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_scenario() {
    let log = EventLog::default();
    let points = store(&[("R1", 0.0, 50)]);
    let at = (BASE_LAT - 0.0018, BASE_LON);
    let (mut monitor, metrics) = monitor(
        points,
        vec![Step::Fix(at.0, at.1), Step::Fix(at.0, at.1), Step::Fix(at.0, at.1)],
        NotifyMode::Ok,
        &log,
    );

    let first = monitor.run_cycle().await;
    assert_eq!(first, CycleOutcome::Scanned { candidates: 1, fired: 1, suppressed: 0, failed: 0 });

    tokio::time::advance(Duration::from_secs(10)).await;
    let second = monitor.run_cycle().await;
    assert_eq!(second, CycleOutcome::Scanned { candidates: 1, fired: 0, suppressed: 1, failed: 0 });

    tokio::time::advance(Duration::from_secs(25)).await;
    let third = monitor.run_cycle().await;
    assert_eq!(third, CycleOutcome::Scanned { candidates: 1, fired: 1, suppressed: 0, failed: 0 });

    assert_eq!(notifications(&log), vec!["notify:R1:200:50", "notify:R1:200:50"]);
    assert_eq!(metrics.alerts_fired_total(), 2);
    assert_eq!(metrics.alerts_suppressed_total(), 1);
}

#[tokio::test]
async fn test_alerts_dispatched_nearest_first() {
    let log = EventLog::default();
    // 100 m, 250 m and 400 m north of the fix
    let points = store(&[("FAR", 0.00225, 90), ("OUT", 0.0036, 130), ("NEAR", 0.0009, 30)]);
    let (mut monitor, _) = monitor(points, vec![Step::Fix(BASE_LAT, BASE_LON)], NotifyMode::Ok, &log);

    let outcome = monitor.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Scanned { candidates: 2, fired: 2, suppressed: 0, failed: 0 });

    let sent = notifications(&log);
    assert_eq!(sent.len(), 2);
    assert!(sent[0].starts_with("notify:NEAR:100:"));
    assert!(sent[1].starts_with("notify:FAR:250:"));
}

#[tokio::test]
async fn test_no_fix_and_source_error_skip_cycle() {
    let log = EventLog::default();
    let points = store(&[("R1", 0.0, 50)]);
    let (mut monitor, metrics) = monitor(points, vec![Step::NoFix, Step::Fail], NotifyMode::Ok, &log);

    let no_fix = monitor.run_cycle().await;
    assert_eq!(no_fix, CycleOutcome::NoFix);
    assert!(!no_fix.is_failure());

    let error = monitor.run_cycle().await;
    assert_eq!(error, CycleOutcome::SourceError);
    assert!(error.is_failure());

    assert!(notifications(&log).is_empty());
    assert_eq!(monitor.gate().tracked(), 0);
    assert_eq!(metrics.no_fix_total(), 1);
    assert_eq!(metrics.source_errors_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_source_counts_as_no_fix() {
    let log = EventLog::default();
    let (mut monitor, metrics) = monitor(store(&[("R1", 0.0, 50)]), vec![Step::Hang], NotifyMode::Ok, &log);

    let started = Instant::now();
    assert_eq!(monitor.run_cycle().await, CycleOutcome::NoFix);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(metrics.no_fix_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_notify_keeps_gate_stamped() {
    let log = EventLog::default();
    let at = (BASE_LAT - 0.0018, BASE_LON);
    let (mut monitor, metrics) = monitor(
        store(&[("R1", 0.0, 50)]),
        vec![Step::Fix(at.0, at.1), Step::Fix(at.0, at.1)],
        NotifyMode::Fail,
        &log,
    );

    let t0 = Instant::now().into_std();
    let outcome = monitor.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Scanned { candidates: 1, fired: 1, suppressed: 0, failed: 1 });
    assert!(outcome.is_failure());
    assert_eq!(metrics.notify_failures_total(), 1);

    let id = PointId::from("R1");
    assert_eq!(monitor.gate().state(&id, t0 + Duration::from_secs(10)), AlertState::Suppressed);

    tokio::time::advance(Duration::from_secs(10)).await;
    let retry = monitor.run_cycle().await;
    assert_eq!(retry, CycleOutcome::Scanned { candidates: 1, fired: 0, suppressed: 1, failed: 0 });
    assert_eq!(notifications(&log).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_notifier_times_out() {
    let log = EventLog::default();
    let (mut monitor, metrics) =
        monitor(store(&[("R1", 0.0, 50)]), vec![Step::Fix(BASE_LAT, BASE_LON)], NotifyMode::Hang, &log);

    let started = Instant::now();
    let outcome = monitor.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Scanned { candidates: 1, fired: 1, suppressed: 0, failed: 1 });
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_eq!(metrics.notify_failures_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_starts_when_fix_arrives() {
    let log = EventLog::default();
    let at = (BASE_LAT - 0.0018, BASE_LON);
    let (mut monitor, _) = monitor(
        store(&[("R1", 0.0, 50)]),
        vec![Step::SlowFix(8, at.0, at.1), Step::Fix(at.0, at.1)],
        NotifyMode::Ok,
        &log,
    );

    let polled = Instant::now();
    monitor.run_cycle().await;
    let id = PointId::from("R1");
    let stamped = monitor.gate().last_fired(&id).unwrap();
    assert_eq!(stamped, (polled + Duration::from_secs(8)).into_std());

    // 29 s after the fix arrived (37 s after the poll began) is still cooling down
    tokio::time::advance(Duration::from_secs(29)).await;
    let second = monitor.run_cycle().await;
    assert_eq!(second, CycleOutcome::Scanned { candidates: 1, fired: 0, suppressed: 1, failed: 0 });
    assert_eq!(notifications(&log).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown_closes_notifier_then_source() {
    let log = EventLog::default();
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);

    let metrics = Arc::new(Metrics::new());
    let source = ScriptedSource::new(vec![Step::NoFix, Step::NoFix, Step::NoFix], log.clone())
        .with_shutdown(tx.clone());
    let notifier = RecordingNotifier { mode: NotifyMode::Ok, log: log.clone() };
    let monitor = MonitorLoop::new(store(&[("R1", 0.0, 50)]), settings(), source, notifier, metrics.clone());

    let summary = monitor.run(rx).await;

    // Three scripted cycles plus the one that requested shutdown
    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.alerts_fired, 0);
    assert_eq!(metrics.no_fix_total(), 4);
    assert_eq!(*log.lock(), vec!["close:notifier".to_string(), "close:source".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_after_source_errors() {
    let log = EventLog::default();
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);

    let source = ScriptedSource::new(
        vec![Step::Fail, Step::Fail, Step::Fix(BASE_LAT, BASE_LON + 1.0), Step::NoFix],
        log.clone(),
    )
    .with_shutdown(tx);
    let poll_times = source.poll_times.clone();
    let notifier = RecordingNotifier { mode: NotifyMode::Ok, log: log.clone() };
    let metrics = Arc::new(Metrics::new());
    let monitor = MonitorLoop::new(store(&[("R1", 0.0, 50)]), settings(), source, notifier, metrics);

    monitor.run(rx).await;

    let times = poll_times.lock().clone();
    assert_eq!(times.len(), 5);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [5, 10, 2, 2].map(Duration::from_secs);
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(
            *gap >= want && *gap < want + Duration::from_millis(10),
            "gaps {gaps:?}, expected {expected:?}"
        );
    }
}

#[tokio::test]
async fn test_shutdown_before_first_cycle() {
    let log = EventLog::default();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let (monitor, metrics) = monitor(store(&[]), vec![Step::NoFix], NotifyMode::Ok, &log);
    let summary = monitor.run(rx).await;

    assert_eq!(summary.cycles, 0);
    assert_eq!(metrics.cycles_total(), 0);
    assert_eq!(*log.lock(), vec!["close:notifier".to_string(), "close:source".to_string()]);
}
