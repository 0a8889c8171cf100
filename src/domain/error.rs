//! Error kinds shared by the detection core and its adapters

use thiserror::Error;

/// Errors raised by the detection core and the I/O adapters.
///
/// Only `SourceUnavailable` during the database load stops the daemon.
/// Everything else is absorbed by the monitor loop and logged.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// The database file or position device could not be reached at all
    #[error("{source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// A single database row was malformed
    #[error("record rejected: {reason}")]
    RecordRejected { reason: String },

    /// The position source returned nothing this cycle
    #[error("no position fix")]
    NoFix,

    /// Alert dispatch failed
    #[error("notify failed for {point_id}: {reason}")]
    NotifyFailed { point_id: String, reason: String },
}

impl SentinelError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable { source_name: source_name.into(), reason: reason.to_string() }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RecordRejected { reason: reason.into() }
    }

    pub fn notify_failed(point_id: impl ToString, reason: impl ToString) -> Self {
        Self::NotifyFailed { point_id: point_id.to_string(), reason: reason.to_string() }
    }

    /// Short machine-friendly name for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::RecordRejected { .. } => "record_rejected",
            Self::NoFix => "no_fix",
            Self::NotifyFailed { .. } => "notify_failed",
        }
    }
}
