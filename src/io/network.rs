//! Wi-Fi link check and provisioning
//!
//! `iwgetid -r` prints the associated SSID and exits 0 when the interface is
//! connected. When credentials are configured, `wpa_passphrase <ssid> <pass>`
//! renders a network block that is appended to the wpa_supplicant config.
//! `wpa_cli -i <iface> reconfigure` then asks wpa_supplicant to retry.
//!
//! All programs are run directly, never through a shell.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Network block from `wpa_passphrase` output, without the plaintext
/// `#psk="..."` comment line
pub fn network_block(passphrase_output: &str) -> String {
    let mut block = String::with_capacity(passphrase_output.len() + 1);
    for line in passphrase_output.lines() {
        if line.trim_start().starts_with("#psk=") {
            continue;
        }
        block.push_str(line);
        block.push('\n');
    }
    block
}

/// Append a network block to a wpa_supplicant config, creating it if needed
pub async fn append_network_block(conf: &Path, block: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(conf).await?;
    file.write_all(block.as_bytes()).await?;
    file.flush().await
}

#[derive(Debug, Clone)]
struct Credentials {
    ssid: String,
    password: String,
    conf: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NetworkLink {
    interface: String,
    connect_wait: Duration,
    credentials: Option<Credentials>,
    passphrase_program: String,
}

impl NetworkLink {
    pub fn new(interface: impl Into<String>, connect_wait: Duration) -> Self {
        Self {
            interface: interface.into(),
            connect_wait,
            credentials: None,
            passphrase_program: "wpa_passphrase".to_string(),
        }
    }

    /// Add this network to `conf` before each reconnect attempt
    pub fn with_credentials(
        mut self,
        ssid: impl Into<String>,
        password: impl Into<String>,
        conf: impl AsRef<Path>,
    ) -> Self {
        self.credentials =
            Some(Credentials { ssid: ssid.into(), password: password.into(), conf: conf.as_ref().to_path_buf() });
        self
    }

    /// Replace the `wpa_passphrase` executable
    pub fn with_passphrase_program(mut self, program: impl Into<String>) -> Self {
        self.passphrase_program = program.into();
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// SSID of the current association, if any
    pub async fn ssid(&self) -> Option<String> {
        let output = Command::new("iwgetid").arg("-r").output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!ssid.is_empty()).then_some(ssid)
    }

    pub async fn is_up(&self) -> bool {
        self.ssid().await.is_some()
    }

    /// Write the configured network into the wpa_supplicant config.
    /// No-op without credentials.
    pub async fn provision(&self) -> std::io::Result<()> {
        let Some(credentials) = &self.credentials else {
            return Ok(());
        };

        let output = Command::new(&self.passphrase_program)
            .arg(&credentials.ssid)
            .arg(&credentials.password)
            .output()
            .await?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                self.passphrase_program, output.status
            )));
        }

        let block = network_block(&String::from_utf8_lossy(&output.stdout));
        append_network_block(&credentials.conf, &block).await?;
        info!(ssid = %credentials.ssid, conf = %credentials.conf.display(), "wifi_network_provisioned");
        Ok(())
    }

    /// Provision, ask wpa_supplicant to reconnect and wait for the link.
    ///
    /// Returns whether the link came up within `connect_wait`. Errors are
    /// provisioning failures; a failed `wpa_cli` is only logged.
    pub async fn connect(&self) -> std::io::Result<bool> {
        warn!(interface = %self.interface, "network_link_down_reconfiguring");
        self.provision().await?;

        match Command::new("wpa_cli").args(["-i", &self.interface, "reconfigure"]).output().await {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(status = %output.status, "wpa_cli_failed"),
            Err(e) => warn!(error = %e, "wpa_cli_spawn_failed"),
        }

        let deadline = tokio::time::Instant::now() + self.connect_wait;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(LINK_CHECK_INTERVAL).await;
            if let Some(ssid) = self.ssid().await {
                info!(interface = %self.interface, ssid = %ssid, "network_link_up");
                return Ok(true);
            }
        }

        warn!(interface = %self.interface, wait_s = %self.connect_wait.as_secs(), "network_link_unavailable");
        Ok(false)
    }
}
