//! Serial NMEA 0183 position source
//!
//! Sentence: `$<talker><type>,<fields...>*<checksum>\r\n`
//! - Checksum: XOR of all bytes between `$` and `*`, two hex digits
//! - RMC: time, status (A/V), lat, N/S, lon, E/W, ...
//! - GGA: time, lat, N/S, lon, E/W, quality (0 = invalid), ...
//!
//! Coordinates are `ddmm.mmmm` / `dddmm.mmmm` and are converted to signed
//! decimal degrees.

use crate::domain::error::SentinelError;
use crate::domain::types::Position;
use crate::io::PositionSource;
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace, warn};

const SOURCE_NAME: &str = "nmea";
const MAX_SENTENCE_LEN: usize = 256;
const READ_CHUNK: usize = 128;

/// Error from decoding a single sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceError {
    NotNmea,
    BadChecksum { expected: u8, actual: u8 },
    Malformed(&'static str),
}

/// XOR of the sentence body
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

/// Convert `ddmm.mmmm` plus hemisphere to signed degrees.
///
/// The two digits before the decimal point and everything after are minutes.
pub fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let value = value.trim();
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return None;
    }
    let degrees: f64 = value.get(..dot - 2)?.parse().ok()?;
    let minutes: f64 = value.get(dot - 2..)?.parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    let magnitude = degrees + minutes / 60.0;
    match hemisphere.trim() {
        "N" | "E" => Some(magnitude),
        "S" | "W" => Some(-magnitude),
        _ => None,
    }
}

/// Decode one sentence into a fix.
///
/// `Ok(None)` for sentences that are valid but carry no fix (other types,
/// RMC status V, GGA quality 0).
pub fn parse_sentence(line: &str) -> Result<Option<Position>, SentenceError> {
    let line = line.trim();
    let body = line.strip_prefix('$').ok_or(SentenceError::NotNmea)?;

    let body = match body.rsplit_once('*') {
        Some((data, sum)) => {
            let expected = u8::from_str_radix(sum.trim(), 16).map_err(|_| SentenceError::Malformed("checksum"))?;
            let actual = checksum(data.as_bytes());
            if expected != actual {
                return Err(SentenceError::BadChecksum { expected, actual });
            }
            data
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let kind = fields[0];
    if kind.len() < 5 {
        return Err(SentenceError::Malformed("sentence type"));
    }
    let field = |idx: usize| fields.get(idx).copied().unwrap_or("");

    let (lat_idx, active) = match kind.get(kind.len() - 3..) {
        Some("RMC") => (3, field(2) == "A"),
        Some("GGA") => (2, field(6).parse::<u8>().map(|q| q > 0).unwrap_or(false)),
        _ => return Ok(None),
    };
    if !active {
        return Ok(None);
    }

    let lat = parse_coordinate(field(lat_idx), field(lat_idx + 1)).ok_or(SentenceError::Malformed("latitude"))?;
    let lon =
        parse_coordinate(field(lat_idx + 2), field(lat_idx + 3)).ok_or(SentenceError::Malformed("longitude"))?;
    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(SentenceError::Malformed("coordinate range"));
    }

    Ok(Some(Position::new(lat, lon)))
}

/// Position source reading a GNSS receiver on a serial port.
///
/// The port is opened on first poll and reopened after a read error.
pub struct NmeaSource {
    device: String,
    baud: u32,
    port: Option<SerialStream>,
    read_buffer: BytesMut,
}

impl NmeaSource {
    pub fn new(device: impl Into<String>, baud: u32) -> Self {
        Self { device: device.into(), baud, port: None, read_buffer: BytesMut::with_capacity(MAX_SENTENCE_LEN) }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn open(&self) -> Result<SerialStream, SentinelError> {
        let port = tokio_serial::new(&self.device, self.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| {
                error!(device = %self.device, error = %e, "nmea_port_open_failed");
                SentinelError::unavailable(SOURCE_NAME, e)
            })?;
        info!(device = %self.device, baud = %self.baud, "nmea_port_opened");
        Ok(port)
    }

    /// Pop the next complete line out of the buffer, if any
    fn next_line(&mut self) -> Option<String> {
        let pos = self.read_buffer.iter().position(|&b| b == b'\n')?;
        let line = self.read_buffer.split_to(pos + 1);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drop buffered bytes that cannot belong to a sentence
    fn synchronize_buffer(&mut self) {
        if self.read_buffer.len() > MAX_SENTENCE_LEN {
            trace!(len = %self.read_buffer.len(), "nmea_buffer_overflow");
            self.read_buffer.clear();
        }
    }

    async fn read_fix(&mut self, port: &mut SerialStream, deadline: Instant) -> Result<Option<Position>, SentinelError> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            while let Some(line) = self.next_line() {
                match parse_sentence(&line) {
                    Ok(Some(fix)) => return Ok(Some(fix)),
                    Ok(None) => {}
                    Err(e) => debug!(error = ?e, "nmea_sentence_rejected"),
                }
            }

            match tokio::time::timeout_at(deadline, port.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    self.synchronize_buffer();
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Ok(Err(e)) => return Err(SentinelError::unavailable(SOURCE_NAME, e)),
            }
        }
    }
}

#[async_trait]
impl PositionSource for NmeaSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Position>, SentinelError> {
        let deadline = Instant::now() + timeout;

        let mut port = match self.port.take() {
            Some(port) => port,
            None => self.open()?,
        };

        // Only sentences received after the request count
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!(error = %e, "nmea_clear_failed");
        }
        self.read_buffer.clear();

        match self.read_fix(&mut port, deadline).await {
            Ok(fix) => {
                self.port = Some(port);
                Ok(fix)
            }
            Err(e) => {
                warn!(device = %self.device, error = %e, "nmea_read_error");
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            info!(device = %self.device, "nmea_port_closed");
        }
    }
}
