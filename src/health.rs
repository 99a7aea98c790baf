//! Builder health escalation.
//!
//! Health is derived from the cumulative number of timed-out events in the
//! current run. It is an operator signal only: processing continues in every
//! state.

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// Timeouts tolerated before reporting WARN.
pub const WARN_TIMEOUT_THRESHOLD: u64 = 10;
/// Timeouts tolerated before reporting ERROR.
pub const ERROR_TIMEOUT_THRESHOLD: u64 = 100;

/// Coarse health state published with the metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Nominal operation
    #[default]
    Ok = 0,
    /// Sustained timeouts, data quality degraded
    Warn = 1,
    /// Timeouts are the norm rather than the exception
    Error = 2,
}

impl HealthStatus {
    /// Health for a cumulative timeout count.
    pub fn from_timeouts(timeouts: u64) -> Self {
        if timeouts > ERROR_TIMEOUT_THRESHOLD {
            HealthStatus::Error
        } else if timeouts > WARN_TIMEOUT_THRESHOLD {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "OK"),
            HealthStatus::Warn => write!(f, "WARN"),
            HealthStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Tracks the current health and logs transitions.
#[derive(Debug, Default)]
pub struct HealthTracker {
    status: HealthStatus,
}

impl HealthTracker {
    /// Current health.
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Re-evaluate against the cumulative timeout count.
    ///
    /// Returns the new state when it changed.
    pub fn update(&mut self, timeouts: u64) -> Option<HealthStatus> {
        let next = HealthStatus::from_timeouts(timeouts);
        if next == self.status {
            return None;
        }

        match next {
            HealthStatus::Ok => info!(timeouts, "Builder health back to OK"),
            HealthStatus::Warn => warn!(timeouts, "Builder health degraded to WARN"),
            HealthStatus::Error => error!(timeouts, "Builder health degraded to ERROR"),
        }
        self.status = next;
        Some(next)
    }

    /// Back to OK, at run start.
    pub fn reset(&mut self) {
        self.status = HealthStatus::Ok;
    }
}
