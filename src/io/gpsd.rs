//! gpsd JSON client
//!
//! Protocol (line oriented JSON over TCP, default port 2947):
//! - Client sends `?WATCH={"enable":true};` once after connecting
//! - Client sends `?POLL;` for every position request
//! - Daemon answers with `{"class":"POLL","tpv":[...],...}` among other
//!   streamed reports (VERSION, DEVICES, WATCH, TPV, SKY)
//!
//! A TPV report carries a fix when `mode >= 2` and both lat and lon are set.
//!
//! gpsd answers polls in order. A poll that timed out still gets its reply
//! later, so the connection counts outstanding polls and discards that many
//! replies before taking one as the current fix.

use crate::domain::error::SentinelError;
use crate::domain::types::Position;
use crate::io::PositionSource;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, info};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true};\n";
const POLL_COMMAND: &[u8] = b"?POLL;\n";
const SOURCE_NAME: &str = "gpsd";

/// Minimum TPV mode for a usable fix (2 = 2D, 3 = 3D)
const MIN_FIX_MODE: u8 = 2;

/// Log connection failure (cold path)
#[cold]
fn log_connect_failed(addr: &str, e: &SentinelError) {
    error!(addr = %addr, error = %e, "gpsd_connect_failed");
}

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    tpv: Vec<Tpv>,
}

#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl Tpv {
    fn fix(&self) -> Option<Position> {
        if self.mode < MIN_FIX_MODE {
            return None;
        }
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some(Position::new(lat, lon)),
            _ => None,
        }
    }
}

/// One decoded line from gpsd
#[derive(Debug, Clone, PartialEq)]
pub enum GpsdReply {
    /// Answer to `?POLL;`, with the first usable fix if any
    Poll(Option<Position>),
    /// Any other report class
    Other(String),
}

/// Decode one JSON line from the daemon
pub fn parse_reply(line: &str) -> Result<GpsdReply, serde_json::Error> {
    let report: Report = serde_json::from_str(line.trim())?;
    if report.class == "POLL" {
        Ok(GpsdReply::Poll(report.tpv.iter().find_map(Tpv::fix)))
    } else {
        Ok(GpsdReply::Other(report.class))
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// `?POLL;` requests sent and not yet answered
    pending_polls: usize,
    /// Partial line kept across a timed-out read
    line: Vec<u8>,
}

/// Position source backed by a local gpsd daemon.
///
/// The connection is opened lazily and dropped on any I/O error, so the
/// next poll reconnects.
pub struct GpsdSource {
    addr: String,
    conn: Option<Connection>,
}

impl GpsdSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), conn: None }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&self, timeout: Duration) -> Result<Connection, SentinelError> {
        info!(addr = %self.addr, "gpsd_connecting");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SentinelError::unavailable(SOURCE_NAME, "connect timeout"))?
            .map_err(|e| SentinelError::unavailable(SOURCE_NAME, e))?;
        let _ = stream.set_nodelay(true);

        let (read_half, mut writer) = stream.into_split();
        writer.write_all(WATCH_COMMAND).await.map_err(|e| SentinelError::unavailable(SOURCE_NAME, e))?;
        info!(addr = %self.addr, "gpsd_connected");

        Ok(Connection { reader: BufReader::new(read_half), writer, pending_polls: 0, line: Vec::new() })
    }

    async fn request_fix(conn: &mut Connection, deadline: Instant) -> Result<Option<Position>, SentinelError> {
        conn.writer.write_all(POLL_COMMAND).await.map_err(|e| SentinelError::unavailable(SOURCE_NAME, e))?;
        conn.pending_polls += 1;

        loop {
            // read_until keeps partial input in `conn.line` when the deadline cancels it
            let n = tokio::time::timeout_at(deadline, conn.reader.read_until(b'\n', &mut conn.line))
                .await
                .map_err(|_| SentinelError::NoFix)?
                .map_err(|e| SentinelError::unavailable(SOURCE_NAME, e))?;
            if n == 0 {
                return Err(SentinelError::unavailable(SOURCE_NAME, "connection closed"));
            }
            if conn.line.last() != Some(&b'\n') {
                continue;
            }

            let line = String::from_utf8_lossy(&conn.line).into_owned();
            conn.line.clear();
            match parse_reply(&line) {
                Ok(GpsdReply::Poll(fix)) => {
                    conn.pending_polls = conn.pending_polls.saturating_sub(1);
                    if conn.pending_polls == 0 {
                        return Ok(fix);
                    }
                    debug!(pending = %conn.pending_polls, "gpsd_stale_poll_reply_skipped");
                }
                Ok(GpsdReply::Other(class)) => debug!(class = %class, "gpsd_report_skipped"),
                Err(e) => debug!(error = %e, "gpsd_unparsable_line"),
            }
        }
    }
}

#[async_trait]
impl PositionSource for GpsdSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Position>, SentinelError> {
        let deadline = Instant::now() + timeout;

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => match self.connect(timeout).await {
                Ok(conn) => conn,
                Err(e) => {
                    log_connect_failed(&self.addr, &e);
                    return Err(e);
                }
            },
        };

        match Self::request_fix(&mut conn, deadline).await {
            Ok(fix) => {
                self.conn = Some(conn);
                Ok(fix)
            }
            // Reply still pending; keep the connection, the late reply is discarded next time
            Err(SentinelError::NoFix) => {
                self.conn = Some(conn);
                Ok(None)
            }
            Err(e) => {
                info!(addr = %self.addr, "gpsd_disconnected");
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.writer.shutdown().await;
            info!(addr = %self.addr, "gpsd_closed");
        }
    }
}
