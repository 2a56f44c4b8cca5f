//! Motion run-time budget tracking.
//!
//! Every motion run gets a hard ceiling: if the roof has not hit a limit
//! switch before the budget is spent, something is wrong (stuck relay,
//! jammed rail, dead motor) and the run must be aborted rather than left
//! powered. The timer itself is pure arithmetic over instants supplied by
//! the caller, so expiry can be tested without sleeping.

use std::time::{Duration, Instant};

/// Elapsed-versus-budget accounting for one motion run.
///
/// Captured once when motion starts and carried inside the moving state;
/// millisecond resolution, matching what the controller's travel times
/// warrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyTimer {
    started_at: Instant,
    budget: Duration,
}

impl SafetyTimer {
    /// Start the clock on a new motion run.
    pub fn start(budget: Duration, now: Instant) -> Self {
        Self {
            started_at: now,
            budget,
        }
    }

    /// The instant the run started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The configured ceiling for this run.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time spent so far.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Budget left, in seconds. Negative once the run has overstayed.
    pub fn remaining_secs(&self, now: Instant) -> f64 {
        let budget_ms = self.budget.as_millis() as i64;
        let elapsed_ms = self.elapsed(now).as_millis() as i64;
        (budget_ms - elapsed_ms) as f64 / 1000.0
    }

    /// Whether the run has used up its budget.
    pub fn expired(&self, now: Instant) -> bool {
        self.remaining_secs(now) <= 0.0
    }
}
