//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `radar_db` - semicolon-delimited radar database file
//! - `gpsd` - gpsd client (TCP, POLL mode)
//! - `nmea` - serial NMEA receiver
//! - `speech` - espeak/aplay alert notifier
//! - `power` - USB power rail for the speaker
//! - `network` - Wi-Fi link check and reconnect
//! - `status` - HTTP status and Prometheus metrics endpoint
//!
//! The monitor loop only sees the traits below.

pub mod gpsd;
pub mod network;
pub mod nmea;
pub mod power;
pub mod radar_db;
pub mod speech;
pub mod status;

use crate::domain::error::SentinelError;
use crate::domain::types::{AlertPayload, Position};
use crate::services::point_store::RawRecord;
use async_trait::async_trait;
use std::time::Duration;

// Re-export commonly used types
pub use gpsd::GpsdSource;
pub use network::NetworkLink;
pub use nmea::NmeaSource;
pub use power::UsbPowerRail;
pub use radar_db::RadarDbFile;
pub use speech::SpeechNotifier;

/// Supplies the latest fix, once per monitor cycle
#[async_trait]
pub trait PositionSource: Send {
    /// Latest fix, or `None` when there is no fix this cycle.
    /// Must not block much past `timeout`; `Err` is only for device errors.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Position>, SentinelError>;

    /// Release the device; called once after the monitor loop stops
    async fn close(&mut self) {}
}

/// Delivers approved alerts
#[async_trait]
pub trait Notifier: Send {
    async fn notify(&mut self, alert: &AlertPayload) -> Result<(), SentinelError>;

    /// Release the output; called once after the monitor loop stops
    async fn close(&mut self) {}
}

#[async_trait]
impl PositionSource for Box<dyn PositionSource> {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Position>, SentinelError> {
        (**self).poll(timeout).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

/// Produces raw database rows; only an unreadable source is an error
pub trait RecordSource {
    fn describe(&self) -> String;

    fn read_records(&self) -> Result<Vec<RawRecord>, SentinelError>;
}
