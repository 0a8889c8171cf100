//! Spoken alerts through espeak and aplay
//!
//! Pipeline per utterance:
//! 1. power the amplifier rail, wait the settle delay
//! 2. `espeak -s <speed> -p <pitch> -a <amplitude> --stdout <text> | aplay -D <device>`
//! 3. wait the settle delay, cut the rail (also when the utterance is dropped)
//!
//! The two processes are piped directly, without a shell.

use crate::domain::error::SentinelError;
use crate::domain::types::AlertPayload;
use crate::infra::config::SpeechConfig;
use crate::io::power::UsbPowerRail;
use crate::io::Notifier;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const START_ANNOUNCEMENT: &str = "Starting radar detection";
pub const STOP_ANNOUNCEMENT: &str = "Radar detection stopped";
pub const ERROR_ANNOUNCEMENT: &str = "System error occurred";
pub const WIFI_CONNECTING_ANNOUNCEMENT: &str = "Connecting to WiFi";
pub const WIFI_CONNECTED_ANNOUNCEMENT: &str = "WiFi connection established. Starting laser radar detection.";
pub const WIFI_FAILED_ANNOUNCEMENT: &str = "WiFi connection failed";
pub const WIFI_ERROR_ANNOUNCEMENT: &str = "WiFi connection error";

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("spawn {program}: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("pipe {program}: {source}")]
    Pipe { program: String, source: std::io::Error },

    #[error("{program}: {source}")]
    Wait { program: String, source: std::io::Error },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },
}

/// Sentence spoken for an alert
pub fn alert_message(alert: &AlertPayload) -> String {
    format!(
        "Attention! Radar detected {} meters ahead. Speed limit {} kilometers per hour. Slow down!",
        alert.distance_m, alert.limit
    )
}

/// Keeps the rail from staying powered when an utterance is abandoned,
/// e.g. when the caller's timeout drops the future mid-speech.
struct RailGuard<'a> {
    power: &'a UsbPowerRail,
    armed: bool,
}

impl<'a> RailGuard<'a> {
    fn arm(power: &'a UsbPowerRail) -> Self {
        Self { power, armed: true }
    }

    async fn release(mut self) {
        let _ = self.power.off().await;
        self.armed = false;
    }
}

impl Drop for RailGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("speech_abandoned_power_off");
            self.power.off_blocking();
        }
    }
}

pub struct SpeechNotifier {
    config: SpeechConfig,
    power: UsbPowerRail,
    synth: String,
    player: String,
}

impl SpeechNotifier {
    pub fn new(config: SpeechConfig, power: UsbPowerRail) -> Self {
        Self { config, power, synth: "espeak".to_string(), player: "aplay".to_string() }
    }

    /// Replace the synthesizer and player executables
    pub fn with_programs(mut self, synth: impl Into<String>, player: impl Into<String>) -> Self {
        self.synth = synth.into();
        self.player = player.into();
        self
    }

    /// Whether startup and shutdown are announced
    pub fn announces_lifecycle(&self) -> bool {
        self.config.enabled && self.config.announce_lifecycle
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.config.settle_ms)
    }

    fn synth_args(&self, text: &str) -> Vec<String> {
        vec![
            "-s".to_string(),
            self.config.speed.to_string(),
            "-p".to_string(),
            self.config.pitch.to_string(),
            "-a".to_string(),
            self.config.amplitude.to_string(),
            "--stdout".to_string(),
            text.to_string(),
        ]
    }

    /// Speak free text. Power rail failures are logged and ignored.
    ///
    /// The rail is cut on every exit, including when this future is dropped
    /// before it completes.
    pub async fn announce(&self, text: &str) -> Result<(), SpeechError> {
        if !self.config.enabled {
            info!(text = %text, "speech_disabled");
            return Ok(());
        }

        let rail = RailGuard::arm(&self.power);
        let _ = self.power.on().await;
        tokio::time::sleep(self.settle()).await;

        let result = self.speak(text).await;

        tokio::time::sleep(self.settle()).await;
        rail.release().await;

        result
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        debug!(text = %text, "speech_start");

        let mut synth = Command::new(&self.synth)
            .args(self.synth_args(text))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpeechError::Spawn { program: self.synth.clone(), source })?;

        let audio: Stdio = synth
            .stdout
            .take()
            .ok_or_else(|| SpeechError::Pipe {
                program: self.synth.clone(),
                source: std::io::Error::other("stdout not captured"),
            })?
            .try_into()
            .map_err(|source| SpeechError::Pipe { program: self.synth.clone(), source })?;

        let mut player = Command::new(&self.player)
            .arg("-D")
            .arg(&self.config.device)
            .stdin(audio)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpeechError::Spawn { program: self.player.clone(), source })?;

        let (synth_status, player_status) = tokio::join!(synth.wait(), player.wait());
        let synth_status =
            synth_status.map_err(|source| SpeechError::Wait { program: self.synth.clone(), source })?;
        let player_status =
            player_status.map_err(|source| SpeechError::Wait { program: self.player.clone(), source })?;

        if !synth_status.success() {
            return Err(SpeechError::Exit { program: self.synth.clone(), status: synth_status });
        }
        if !player_status.success() {
            return Err(SpeechError::Exit { program: self.player.clone(), status: player_status });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SpeechNotifier {
    async fn notify(&mut self, alert: &AlertPayload) -> Result<(), SentinelError> {
        self.announce(&alert_message(alert))
            .await
            .map_err(|e| SentinelError::notify_failed(&alert.point_id, e))
    }

    async fn close(&mut self) {
        if !self.announces_lifecycle() {
            return;
        }
        if let Err(e) = self.announce(STOP_ANNOUNCEMENT).await {
            warn!(error = %e, "speech_stop_announcement_failed");
        }
    }
}
