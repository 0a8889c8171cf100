//! Per-point alert cooldown
//!
//! A point is Armed until it fires, then Suppressed for the cooldown.
//! Re-arming is evaluated lazily on the next attempt; there are no timers.
//! Records are keyed by point id and live for the whole process.

use crate::domain::types::PointId;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default cooldown between two alerts for the same point (30 seconds)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Armed,
    Suppressed,
}

/// Result of a fire attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Alert approved; the record now holds the attempt time
    Fired,
    /// Still cooling down; nothing changed
    Suppressed { remaining: Duration },
}

impl GateDecision {
    pub fn is_fired(&self) -> bool {
        matches!(self, GateDecision::Fired)
    }
}

pub struct AlertGate {
    cooldown: Duration,
    /// Last successful alert per point
    last_fired: FxHashMap<PointId, Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown, last_fired: FxHashMap::default() }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Attempt to fire an alert for `id` at `now`
    pub fn fire(&mut self, id: &PointId, now: Instant) -> GateDecision {
        if let Some(remaining) = self.remaining(id, now) {
            trace!(id = %id, remaining_ms = %remaining.as_millis(), "alert_suppressed");
            return GateDecision::Suppressed { remaining };
        }

        let previous = self.last_fired.insert(id.clone(), now);
        debug!(id = %id, rearmed = %previous.is_some(), "alert_gate_fired");
        GateDecision::Fired
    }

    /// Current state of `id` at `now`, without changing anything
    pub fn state(&self, id: &PointId, now: Instant) -> AlertState {
        match self.remaining(id, now) {
            Some(_) => AlertState::Suppressed,
            None => AlertState::Armed,
        }
    }

    pub fn last_fired(&self, id: &PointId) -> Option<Instant> {
        self.last_fired.get(id).copied()
    }

    /// Number of points that have ever fired
    pub fn tracked(&self) -> usize {
        self.last_fired.len()
    }

    /// Remaining cooldown, or None when armed.
    /// A `now` before the record counts as zero elapsed.
    fn remaining(&self, id: &PointId, now: Instant) -> Option<Duration> {
        let last = self.last_fired.get(id)?;
        let elapsed = now.saturating_duration_since(*last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
