//! Services - detection core
//!
//! This module contains the detection logic, free of device I/O:
//! - `point_store` - Validated, immutable radar database
//! - `scanner` - Points within the detection radius of a fix
//! - `alert_gate` - Per-point alert cooldown
//! - `backoff` - Delay between monitor cycles after failures
//! - `monitor` - Poll, scan, gate and dispatch loop

pub mod alert_gate;
pub mod backoff;
pub mod monitor;
pub mod point_store;
pub mod scanner;

// Re-export commonly used types
pub use alert_gate::{AlertGate, GateDecision};
pub use monitor::{CycleOutcome, MonitorLoop, MonitorSettings, MonitorSummary};
pub use point_store::{LoadReport, PointStore, RawRecord};
pub use scanner::ProximityScanner;
