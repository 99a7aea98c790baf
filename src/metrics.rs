//! Builder metrics.
//!
//! Counters are plain fields written only by the dispatch task. They are never
//! read concurrently: after every cycle the dispatcher copies them into a
//! [`MetricsSnapshot`] and publishes it on a `tokio::sync::watch` channel.
//! Readers such as [`spawn_reporter`] only ever see whole snapshots.

use crate::config::MetricsConfig;
use crate::health::HealthStatus;
use evb_format::{EventTag, TAG_COUNT};
use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Counters owned by the assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuilderCounters {
    /// Events created per class
    #[serde(serialize_with = "per_tag")]
    pub created: [u64; TAG_COUNT],
    /// Events sent per output class
    #[serde(serialize_with = "per_tag")]
    pub emitted: [u64; TAG_COUNT],
    /// Events currently pending per class
    #[serde(serialize_with = "per_tag")]
    pub pending: [u64; TAG_COUNT],
    /// Fragments routed to the corrupted class because of their status
    pub corrupted_fragments: u64,
    /// Buffers that could not be decoded
    pub decode_errors: u64,
    /// Fragments whose tag was outside the known classes
    pub unknown_tags: u64,
    /// Source collisions inside an event
    pub duplicate_sources: u64,
    /// Fragments dropped after colliding in the duplicate class
    pub dropped_duplicates: u64,
    /// Events forced out by age
    pub timeouts: u64,
    /// Events forced out by the pending limit
    pub overflows: u64,
    /// Fragments whose BCID differed beyond tolerance
    pub bcid_mismatches: u64,
    /// Failed receive calls
    pub receive_errors: u64,
    /// Events the output channel did not accept
    pub send_failures: u64,
}

fn per_tag<S: Serializer>(values: &[u64; TAG_COUNT], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        EventTag::ALL
            .iter()
            .map(|tag| (tag.name(), values[tag.index()])),
    )
}

/// Consistent copy of the builder's state between two cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Current run number
    pub run_number: u32,
    /// Run start, seconds since the Unix epoch
    pub run_start: i64,
    /// When the snapshot was taken, microseconds since the Unix epoch
    pub taken_at_micros: u64,
    /// Health derived from the timeout count
    pub health: HealthStatus,
    /// Counter values
    pub counters: BuilderCounters,
}

impl MetricsSnapshot {
    /// Events emitted on the output of `tag`.
    pub fn emitted(&self, tag: EventTag) -> u64 {
        self.counters.emitted[tag.index()]
    }

    /// Events currently pending in `tag`.
    pub fn pending(&self, tag: EventTag) -> u64 {
        self.counters.pending[tag.index()]
    }

    /// Events created in `tag` this run.
    pub fn created(&self, tag: EventTag) -> u64 {
        self.counters.created[tag.index()]
    }
}

/// Derives per-class emission rates from successive snapshots.
#[derive(Debug, Default)]
pub struct RateTracker {
    previous: Option<(u64, [u64; TAG_COUNT])>,
}

impl RateTracker {
    /// Rates in Hz since the previous call, indexed by tag.
    ///
    /// The first call, a clock that did not move, and counters that went
    /// backwards (a new run) all yield zero.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) -> [f64; TAG_COUNT] {
        let mut rates = [0.0; TAG_COUNT];
        let now = snapshot.taken_at_micros;
        let emitted = snapshot.counters.emitted;

        if let Some((then, before)) = self.previous {
            let elapsed_s = now.saturating_sub(then) as f64 / 1e6;
            if elapsed_s > 0.0 {
                for i in 0..TAG_COUNT {
                    if emitted[i] >= before[i] {
                        rates[i] = (emitted[i] - before[i]) as f64 / elapsed_s;
                    }
                }
            }
        }

        self.previous = Some((now, emitted));
        rates
    }
}

#[derive(Serialize)]
struct ReportLine<'a> {
    #[serde(flatten)]
    snapshot: &'a MetricsSnapshot,
    #[serde(serialize_with = "rates_per_tag")]
    rates_hz: &'a [f64; TAG_COUNT],
}

fn rates_per_tag<S: Serializer>(values: &&[f64; TAG_COUNT], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        EventTag::ALL
            .iter()
            .map(|tag| (tag.name(), values[tag.index()])),
    )
}

/// Log one report for `snapshot`.
pub fn report(snapshot: &MetricsSnapshot, rates: &[f64; TAG_COUNT], json: bool) {
    if json {
        let line = ReportLine {
            snapshot,
            rates_hz: rates,
        };
        match serde_json::to_string(&line) {
            Ok(line) => info!(target: "rust_evb::metrics", "{}", line),
            Err(e) => warn!(error = %e, "Failed to encode metrics report"),
        }
        return;
    }

    let c = &snapshot.counters;
    info!(
        target: "rust_evb::metrics",
        run_number = snapshot.run_number,
        health = %snapshot.health,
        physics = c.emitted[EventTag::Physics.index()],
        physics_rate = rates[EventTag::Physics.index()],
        calibration = c.emitted[EventTag::Calibration.index()],
        monitoring = c.emitted[EventTag::Monitoring.index()],
        tlb_monitoring = c.emitted[EventTag::TlbMonitoring.index()],
        incomplete = c.emitted[EventTag::Incomplete.index()],
        corrupted_fragments = c.corrupted_fragments,
        duplicate_sources = c.duplicate_sources,
        timeouts = c.timeouts,
        bcid_mismatches = c.bcid_mismatches,
        physics_pending = c.pending[EventTag::Physics.index()],
        "Builder metrics"
    );
}

/// Spawn a task that reports the latest snapshot every interval.
///
/// The task ends after one final report once the publishing side is dropped.
pub fn spawn_reporter(
    mut snapshots: watch::Receiver<MetricsSnapshot>,
    config: MetricsConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.report_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rates = RateTracker::default();

        loop {
            ticker.tick().await;
            let closed = snapshots.has_changed().is_err();
            let snapshot = snapshots.borrow_and_update().clone();
            report(&snapshot, &rates.update(&snapshot), config.json);
            if closed {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn snapshot_at(micros: u64, physics: u64) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            taken_at_micros: micros,
            ..Default::default()
        };
        snapshot.counters.emitted[EventTag::Physics.index()] = physics;
        snapshot
    }

    #[test]
    fn rates_follow_emitted_counts() {
        let mut tracker = RateTracker::default();

        assert_eq!(tracker.update(&snapshot_at(0, 0)), [0.0; TAG_COUNT]);
        let rates = tracker.update(&snapshot_at(2_000_000, 500));
        assert_eq!(rates[EventTag::Physics.index()], 250.0);
        assert_eq!(rates[EventTag::Monitoring.index()], 0.0);
    }

    #[test]
    fn rates_reset_when_counts_go_backwards() {
        let mut tracker = RateTracker::default();
        tracker.update(&snapshot_at(0, 900));
        let rates = tracker.update(&snapshot_at(1_000_000, 10));
        assert_eq!(rates[EventTag::Physics.index()], 0.0);
    }

    #[test]
    fn json_report_names_classes() {
        let snapshot = snapshot_at(1, 3);
        let mut rates = [0.0; TAG_COUNT];
        rates[0] = 1.5;
        let line = serde_json::to_value(ReportLine {
            snapshot: &snapshot,
            rates_hz: &rates,
        })
        .unwrap();

        assert_eq!(line["counters"]["emitted"]["physics"], 3);
        assert_eq!(line["rates_hz"]["physics"], 1.5);
        assert_eq!(line["health"], "OK");
    }

    #[tokio::test]
    async fn reporter_exits_after_publisher_drops() {
        let (tx, rx) = watch::channel(MetricsSnapshot::default());
        let handle = spawn_reporter(
            rx,
            MetricsConfig {
                report_interval_ms: 5,
                json: false,
            },
        );

        tx.send_replace(snapshot_at(10, 7));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reporter should stop")
            .expect("reporter should not panic");
    }

    #[test]
    #[traced_test]
    fn plain_report_logs_counters() {
        report(&snapshot_at(1, 3), &[0.0; TAG_COUNT], false);
        assert!(logs_contain("Builder metrics"));
        assert!(logs_contain("physics=3"));
    }
}
