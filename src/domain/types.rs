//! Shared types for the radar sentinel

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Newtype wrapper for point-of-interest IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(pub String);

impl PointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A fixed point of interest loaded from the radar database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub id: PointId,
    pub lat: f64,
    pub lon: f64,
    /// Speed limit at the radar (km/h)
    pub limit: i32,
}

impl Point {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, limit: i32) -> Self {
        Self { id: PointId(id.into()), lat, lon, limit }
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position { lat: self.lat, lon: self.lon }
    }
}

/// A single fix from the position source, in plain degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lon)
    }
}

/// A point found within the detection radius of the current fix.
///
/// Borrows the point from the store; lives for one monitor cycle.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub point: &'a Point,
    pub distance_m: f64,
}

impl Candidate<'_> {
    /// Distance ascending, then id ascending
    pub fn nearest_first(&self, other: &Self) -> Ordering {
        self.distance_m
            .total_cmp(&other.distance_m)
            .then_with(|| self.point.id.cmp(&other.point.id))
    }

    pub fn to_payload(&self) -> AlertPayload {
        AlertPayload {
            point_id: self.point.id.clone(),
            distance_m: self.distance_m.round() as u32,
            limit: self.point.limit,
        }
    }
}

/// What the notifier receives for one approved alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertPayload {
    pub point_id: PointId,
    /// Distance rounded to the nearest meter
    pub distance_m: u32,
    pub limit: i32,
}
