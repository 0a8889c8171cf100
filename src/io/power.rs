//! USB power rail for the speaker amplifier
//!
//! The amplifier is powered from a USB port. Writing the port name (e.g.
//! `1-1`) to `<sysfs>/bind` powers it, writing it to `<sysfs>/unbind` cuts it.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_SYSFS_DIR: &str = "/sys/bus/usb/drivers/usb";

#[derive(Debug, Clone)]
pub struct UsbPowerRail {
    port: String,
    sysfs_dir: PathBuf,
    enabled: bool,
}

impl UsbPowerRail {
    pub fn new(port: impl Into<String>, sysfs_dir: impl AsRef<Path>) -> Self {
        Self { port: port.into(), sysfs_dir: sysfs_dir.as_ref().to_path_buf(), enabled: true }
    }

    /// Rail that never touches sysfs (amplifier always powered)
    pub fn disabled() -> Self {
        Self { port: String::new(), sysfs_dir: PathBuf::from(DEFAULT_SYSFS_DIR), enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn on(&self) -> std::io::Result<()> {
        self.write("bind").await
    }

    pub async fn off(&self) -> std::io::Result<()> {
        self.write("unbind").await
    }

    /// Cut the rail without an executor, for drop paths
    pub fn off_blocking(&self) {
        if !self.enabled {
            return;
        }
        let path = self.sysfs_dir.join("unbind");
        match std::fs::write(&path, self.port.as_bytes()) {
            Ok(()) => debug!(port = %self.port, action = "unbind", "usb_power_switched"),
            Err(e) => warn!(port = %self.port, path = %path.display(), error = %e, "usb_power_switch_failed"),
        }
    }

    async fn write(&self, action: &str) -> std::io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.sysfs_dir.join(action);
        match tokio::fs::write(&path, self.port.as_bytes()).await {
            Ok(()) => {
                debug!(port = %self.port, action = %action, "usb_power_switched");
                Ok(())
            }
            Err(e) => {
                warn!(port = %self.port, path = %path.display(), error = %e, "usb_power_switch_failed");
                Err(e)
            }
        }
    }
}
