//! Status HTTP endpoint
//!
//! - `GET /metrics`: Prometheus text exposition format
//! - `GET /health`: JSON liveness with the last fix
//!
//! Both read `Metrics::snapshot()`, so scrapes never reset the periodic
//! report window.
//!
//! Uses hyper for the HTTP server. Disabled when the configured port is 0.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, source: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{source=\"{source}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, source: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{source=\"{source}\"}} {val:.6}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    source: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{source=\"{source}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{source=\"{source}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{source=\"{source}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{source=\"{source}\"}} {count}");
}

/// Format a metrics summary in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, source: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(&mut output, "radar_cycles_total", "Monitor cycles run", MetricType::Counter, source, summary.cycles_total);
    write_metric(
        &mut output,
        "radar_no_fix_total",
        "Cycles skipped without a position fix",
        MetricType::Counter,
        source,
        summary.no_fix_total,
    );
    write_metric(
        &mut output,
        "radar_source_errors_total",
        "Position source errors",
        MetricType::Counter,
        source,
        summary.source_errors_total,
    );
    write_metric(
        &mut output,
        "radar_candidates_total",
        "Points found inside the detection radius",
        MetricType::Counter,
        source,
        summary.candidates_total,
    );
    write_metric(
        &mut output,
        "radar_alerts_fired_total",
        "Alerts approved by the gate",
        MetricType::Counter,
        source,
        summary.alerts_fired_total,
    );
    write_metric(
        &mut output,
        "radar_alerts_suppressed_total",
        "Alerts suppressed by the cooldown",
        MetricType::Counter,
        source,
        summary.alerts_suppressed_total,
    );
    write_metric(
        &mut output,
        "radar_notify_failures_total",
        "Alert dispatches that failed or timed out",
        MetricType::Counter,
        source,
        summary.notify_failures_total,
    );
    write_metric(
        &mut output,
        "radar_failure_streak",
        "Consecutive failed cycles",
        MetricType::Gauge,
        source,
        summary.failure_streak,
    );
    write_metric(&mut output, "radar_points_loaded", "Points in the store", MetricType::Gauge, source, summary.points_loaded);
    write_metric(
        &mut output,
        "radar_records_skipped",
        "Database records rejected at load",
        MetricType::Gauge,
        source,
        summary.records_skipped,
    );

    write_histogram(
        &mut output,
        "radar_scan_latency_us",
        "Proximity scan latency in microseconds",
        source,
        &summary.scan_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.scan_avg_us,
    );
    write_metric(
        &mut output,
        "radar_scan_latency_max_us",
        "Maximum proximity scan latency",
        MetricType::Gauge,
        source,
        summary.scan_max_us,
    );

    if let Some(age) = summary.last_fix_age {
        write_gauge_f64(&mut output, "radar_last_fix_age_seconds", "Seconds since the last fix", source, age.as_secs_f64());
    }

    output
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    points: u64,
    cycles: u64,
    failure_streak: u64,
    last_fix: Option<[f64; 2]>,
    last_fix_age_s: Option<u64>,
}

/// Health document served at `/health`
pub fn format_health(summary: &MetricsSummary) -> String {
    let health = Health {
        status: "ok",
        points: summary.points_loaded,
        cycles: summary.cycles_total,
        failure_streak: summary.failure_streak,
        last_fix: summary.last_fix.map(|p| [p.lat, p.lon]),
        last_fix_age_s: summary.last_fix_age.map(|d| d.as_secs()),
    };
    serde_json::to_string(&health).unwrap_or_else(|_| r#"{"status":"ok"}"#.to_string())
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    source: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.snapshot(), &source);
            Ok(response(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body))
        }
        (&Method::GET, "/health") => {
            Ok(response(StatusCode::OK, "application/json", format_health(&metrics.snapshot())))
        }
        _ => Ok(response(StatusCode::NOT_FOUND, "text/plain", "Not Found")),
    }
}

/// Start the status HTTP server and serve until shutdown
pub async fn start_status_server(
    port: u16,
    metrics: Arc<Metrics>,
    source: String,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let source = Arc::new(source);

    info!(port = %port, "status_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let source = source.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let source = source.clone();
                                async move { handle_request(req, metrics, source).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
