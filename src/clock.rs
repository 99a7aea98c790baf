//! Time sources for event aging.
//!
//! The assembler never reads the system clock directly: it asks a [`Clock`].
//! Production uses [`SystemClock`]; tests drive a [`ManualClock`] so timeouts
//! can be exercised without sleeping.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time in microseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now_micros(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        Utc::now().timestamp_micros().max(0) as u64
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock starting at `start_micros`.
    pub fn new(start_micros: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_micros)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, micros: u64) {
        self.now.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();

        clock.advance(Duration::from_millis(5));
        assert_eq!(other.now_micros(), 6_000);

        other.set(42);
        assert_eq!(clock.now_micros(), 42);
    }

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z in microseconds
        assert!(SystemClock.now_micros() > 1_577_836_800_000_000);
    }
}
