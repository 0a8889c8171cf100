//! Delay policy between monitor cycles
//!
//! Clean cycles wait the normal poll interval. Consecutive failed cycles
//! wait longer, doubling up to a bounded number of steps and a ceiling.
//! The loop never gives up.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    error_base: Duration,
    error_max: Duration,
    max_steps: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, error_base: Duration, error_max: Duration, max_steps: u32) -> Self {
        Self { interval, error_base, error_max, max_steps: max_steps.max(1), failures: 0 }
    }

    /// Record a clean cycle and return the next delay
    pub fn on_success(&mut self) -> Duration {
        self.failures = 0;
        self.interval
    }

    /// Record a failed cycle and return the next delay
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exponent = self.failures.min(self.max_steps) - 1;
        let delay = self.error_base.saturating_mul(1u32 << exponent.min(31));
        // Never shorter than a normal cycle
        delay.min(self.error_max).max(self.interval)
    }

    /// Consecutive failed cycles so far
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
