//! Domain models - core types, distance math and error kinds
//!
//! This module contains the canonical data types used throughout the system:
//! - `Point` - a radar location loaded from the database
//! - `Position` - a single fix from the GNSS receiver
//! - `Candidate` - a point within the detection radius of a fix
//! - `AlertPayload` - what the notifier speaks
//! - `geo` - haversine distance
//! - `SentinelError` - error kinds

pub mod error;
pub mod geo;
pub mod types;

// Re-export commonly used types at module level
pub use error::SentinelError;
pub use types::{AlertPayload, Candidate, Point, PointId, Position};
