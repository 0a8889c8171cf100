//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/radar.toml
//!
//! Every section and key is optional; omitted values take the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/radar.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSourceKind {
    Gpsd,
    Nmea,
}

impl PositionSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSourceKind::Gpsd => "gpsd",
            PositionSourceKind::Nmea => "nmea",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Semicolon-delimited radar database
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "radars.csv".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub radius_m: f64,
    pub cooldown_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { radius_m: 300.0, cooldown_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub poll_timeout_ms: u64,
    pub notify_timeout_ms: u64,
    /// First delay after a failed cycle
    pub error_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Number of doublings before the backoff stops growing
    pub backoff_steps: u32,
    /// Interval for the periodic metrics log line
    pub metrics_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            poll_timeout_ms: 10_000,
            notify_timeout_ms: 30_000,
            error_backoff_secs: 5,
            max_backoff_secs: 60,
            backoff_steps: 4,
            metrics_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub source: PositionSourceKind,
    pub gpsd_addr: String,
    pub serial_device: String,
    pub serial_baud: u32,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            source: PositionSourceKind::Gpsd,
            gpsd_addr: "127.0.0.1:2947".to_string(),
            serial_device: "/dev/ttyAMA0".to_string(),
            serial_baud: 9600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// ALSA output device passed to aplay
    pub device: String,
    pub speed: u32,
    pub pitch: u32,
    pub amplitude: u32,
    /// Delay after powering the speaker and before cutting it
    pub settle_ms: u64,
    /// Speak on startup and shutdown
    pub announce_lifecycle: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "plughw:0,0".to_string(),
            speed: 160,
            pitch: 50,
            amplitude: 100,
            settle_ms: 500,
            announce_lifecycle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub enabled: bool,
    /// USB port id written to the driver bind/unbind files
    pub usb_port: String,
    pub sysfs_dir: String,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            usb_port: "1-1".to_string(),
            sysfs_dir: "/sys/bus/usb/drivers/usb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Refuse to start without a Wi-Fi link
    pub require_link: bool,
    pub interface: String,
    pub connect_wait_secs: u64,
    /// Network added to wpa_supplicant before reconnecting, when both are set
    pub ssid: Option<String>,
    pub password: Option<String>,
    pub wpa_supplicant_conf: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            require_link: false,
            interface: "wlan0".to_string(),
            connect_wait_secs: 10,
            ssid: None,
            password: None,
            wpa_supplicant_conf: "/etc/wpa_supplicant/wpa_supplicant.conf".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StatusConfig {
    /// HTTP status port (0 to disable)
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub database: DatabaseConfig,
    pub detection: DetectionConfig,
    pub monitor: MonitorConfig,
    pub position: PositionConfig,
    pub speech: SpeechConfig,
    pub power: PowerConfig,
    pub network: NetworkConfig,
    pub status: StatusConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    database: DatabaseConfig,
    detection: DetectionConfig,
    monitor: MonitorConfig,
    position: PositionConfig,
    speech: SpeechConfig,
    power: PowerConfig,
    network: NetworkConfig,
    status: StatusConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let mut detection = toml_config.detection;
        if !detection.radius_m.is_finite() || detection.radius_m < 0.0 {
            eprintln!("Warning: invalid detection.radius_m {}. Using 300.", detection.radius_m);
            detection.radius_m = DetectionConfig::default().radius_m;
        }

        Self {
            database: toml_config.database,
            detection,
            monitor: toml_config.monitor,
            position: toml_config.position,
            speech: toml_config.speech,
            power: toml_config.power,
            network: toml_config.network,
            status: toml_config.status,
            config_file,
        }
    }

    /// Config file path when `--config` is not given: `CONFIG_FILE` or the default
    pub fn resolve_config_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn database_path(&self) -> &str {
        &self.database.path
    }

    pub fn detection_radius_m(&self) -> f64 {
        self.detection.radius_m
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.detection.cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.notify_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.monitor.error_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.monitor.max_backoff_secs)
    }

    pub fn backoff_steps(&self) -> u32 {
        self.monitor.backoff_steps
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.metrics_interval_secs.max(1))
    }

    pub fn position_source(&self) -> PositionSourceKind {
        self.position.source
    }

    pub fn gpsd_addr(&self) -> &str {
        &self.position.gpsd_addr
    }

    pub fn serial_device(&self) -> &str {
        &self.position.serial_device
    }

    pub fn serial_baud(&self) -> u32 {
        self.position.serial_baud
    }

    pub fn speech(&self) -> &SpeechConfig {
        &self.speech
    }

    pub fn power(&self) -> &PowerConfig {
        &self.power
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn status_port(&self) -> u16 {
        self.status.port
    }

    /// Override the database path (command line takes precedence over the file)
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database.path = path.into();
        self
    }

    /// Override the Wi-Fi credentials; `None` keeps the value from the file
    pub fn with_wifi_credentials(mut self, ssid: Option<String>, password: Option<String>) -> Self {
        if ssid.is_some() {
            self.network.ssid = ssid;
        }
        if password.is_some() {
            self.network.password = password;
        }
        self
    }
}
