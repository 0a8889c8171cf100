//! Radar sentinel - spoken speed camera alerts for a Raspberry Pi
//!
//! Polls a GNSS fix, looks up known radar sites within the detection radius
//! and speaks an alert for each one, at most once per cooldown.
//!
//! Module structure:
//! - `domain/` - Core types (Point, Position, errors, distance)
//! - `io/` - Devices (gpsd, NMEA serial, speech, USB power, status endpoint)
//! - `services/` - Detection core (PointStore, scanner, alert gate, monitor)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use radar_sentinel::infra::{Config, Metrics, PositionSourceKind};
use radar_sentinel::io::speech::{
    ERROR_ANNOUNCEMENT, START_ANNOUNCEMENT, WIFI_CONNECTED_ANNOUNCEMENT, WIFI_CONNECTING_ANNOUNCEMENT,
    WIFI_ERROR_ANNOUNCEMENT, WIFI_FAILED_ANNOUNCEMENT,
};
use radar_sentinel::io::{
    GpsdSource, NetworkLink, NmeaSource, PositionSource, RadarDbFile, SpeechNotifier, UsbPowerRail,
};
use radar_sentinel::services::{MonitorLoop, MonitorSettings, PointStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Radar sentinel - proximity alerts for known speed cameras
#[derive(Parser, Debug)]
#[command(name = "radar-sentinel", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/radar.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Radar database file, overrides `database.path`
    #[arg(long)]
    db: Option<String>,

    /// Wi-Fi network to add before connecting, overrides `network.ssid`
    #[arg(long)]
    ssid: Option<String>,

    /// Wi-Fi password, overrides `network.password`
    #[arg(long)]
    password: Option<String>,
}

fn build_notifier(config: &Config) -> SpeechNotifier {
    let power = if config.power().enabled {
        UsbPowerRail::new(&config.power().usb_port, &config.power().sysfs_dir)
    } else {
        UsbPowerRail::disabled()
    };
    SpeechNotifier::new(config.speech().clone(), power)
}

fn build_source(config: &Config) -> Box<dyn PositionSource> {
    match config.position_source() {
        PositionSourceKind::Gpsd => Box::new(GpsdSource::new(config.gpsd_addr())),
        PositionSourceKind::Nmea => Box::new(NmeaSource::new(config.serial_device(), config.serial_baud())),
    }
}

async fn say(notifier: &SpeechNotifier, text: &str) {
    if notifier.announces_lifecycle() {
        if let Err(e) = notifier.announce(text).await {
            warn!(error = %e, text = %text, "speech_announcement_failed");
        }
    }
}

/// Bring up the Wi-Fi link, provisioning the configured network if needed
async fn bring_up_link(config: &Config, notifier: &SpeechNotifier) -> anyhow::Result<()> {
    let network = config.network();
    let mut link = NetworkLink::new(&network.interface, std::time::Duration::from_secs(network.connect_wait_secs));
    if let (Some(ssid), Some(password)) = (&network.ssid, &network.password) {
        link = link.with_credentials(ssid, password, &network.wpa_supplicant_conf);
    }

    if let Some(ssid) = link.ssid().await {
        info!(interface = %link.interface(), ssid = %ssid, "network_link_up");
        return Ok(());
    }

    say(notifier, WIFI_CONNECTING_ANNOUNCEMENT).await;
    match link.connect().await {
        Ok(true) => {
            say(notifier, WIFI_CONNECTED_ANNOUNCEMENT).await;
            Ok(())
        }
        Ok(false) => {
            say(notifier, WIFI_FAILED_ANNOUNCEMENT).await;
            anyhow::bail!("network link {} is down", link.interface())
        }
        Err(e) => {
            error!(error = %e, "wifi_provisioning_failed");
            say(notifier, WIFI_ERROR_ANNOUNCEMENT).await;
            Err(e).context("cannot provision the Wi-Fi network")
        }
    }
}

/// Resolves once Ctrl+C or SIGTERM arrives
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-cycle fixes
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "radar-sentinel starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::resolve_config_path);
    let mut config = Config::load_from_path(&config_path).with_wifi_credentials(args.ssid, args.password);
    if let Some(db) = args.db {
        config = config.with_database_path(db);
    }

    info!(
        config_file = %config.config_file(),
        database = %config.database_path(),
        radius_m = %config.detection_radius_m(),
        cooldown_s = %config.cooldown().as_secs(),
        poll_interval_s = %config.poll_interval().as_secs(),
        source = %config.position_source().as_str(),
        speech = %config.speech().enabled,
        status_port = %config.status_port(),
        "config_loaded"
    );

    let notifier = build_notifier(&config);

    if config.network().require_link {
        bring_up_link(&config, &notifier).await?;
    }

    let source = RadarDbFile::new(config.database_path());
    let (store, report) = match PointStore::load(&source) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "radar_database_load_failed");
            say(&notifier, ERROR_ANNOUNCEMENT).await;
            return Err(e).context("cannot start without the radar database");
        }
    };

    let metrics = Arc::new(Metrics::new());
    metrics.set_database(report.accepted, report.skipped);
    let store = Arc::new(store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Status HTTP endpoint (if port > 0)
    let status_port = config.status_port();
    if status_port > 0 {
        let status_metrics = metrics.clone();
        let status_shutdown = shutdown_rx.clone();
        let source_name = config.position_source().as_str().to_string();
        tokio::spawn(async move {
            if let Err(e) = radar_sentinel::io::status::start_status_server(
                status_port,
                status_metrics,
                source_name,
                status_shutdown,
            )
            .await
            {
                error!(error = %e, "status_server_error");
            }
        });
    }

    // Periodic metrics log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(metrics_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    say(&notifier, START_ANNOUNCEMENT).await;

    let monitor = MonitorLoop::new(
        store,
        MonitorSettings::from_config(&config),
        build_source(&config),
        notifier,
        metrics,
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let summary = monitor_handle.await.context("monitor task failed")?;

    info!(cycles = %summary.cycles, alerts = %summary.alerts_fired, "radar-sentinel shutdown complete");
    Ok(())
}
