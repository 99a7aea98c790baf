//! Event assembly.
//!
//! The [`EventAssembler`] owns one [`PendingTable`] per event class. Fragments
//! are routed to a class by [`RoutingPolicy`], merged into the event with
//! their upstream id, and marked ready once complete:
//!
//! - physics events need one fragment from each of `num_channels` sources
//! - every other class is complete with its first fragment
//!
//! A source that contributes twice to the same event (or a physics event that
//! is already full) is a collision. The fragment is rerouted once to the
//! duplicate class with the DUPLICATE status bit set; a collision there drops
//! it. Ready events stay in their table until [`EventAssembler::take_ready`],
//! so late fragments for a complete event still collide.

pub mod decoder;
pub mod event;
pub mod pending;
pub mod routing;
pub mod sweeper;

pub use decoder::{Decoded, FragmentDecoder};
pub use event::Event;
pub use pending::PendingTable;
pub use routing::{Route, RoutingPolicy};
pub use sweeper::TimeoutSweeper;

use crate::config::BuilderConfig;
use crate::error::{AppResult, EvbError};
use crate::health::HealthStatus;
use crate::metrics::{BuilderCounters, MetricsSnapshot};
use evb_format::{EventStatus, EventTag, Fragment, MAX_RUN_NUMBER, TAG_COUNT};
use tracing::{debug, error, info, warn};

/// Result of merging into one class.
#[derive(Debug)]
pub enum MergeResult {
    /// Merged; `ready` tells whether the event is now complete.
    Merged {
        /// Event is complete
        ready: bool,
    },
    /// Merged, and the fragment's BCID differed from the event's.
    MergedWithBcidMismatch {
        /// Event is complete
        ready: bool,
    },
    /// The source already contributed; the fragment is handed back.
    DuplicateSource {
        /// The rejected fragment
        fragment: Fragment,
    },
}

/// What [`EventAssembler::merge`] did with a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged into its routed class.
    Merged {
        /// Class merged into
        bucket: EventTag,
        /// Upstream event id
        event_id: u64,
        /// Event is complete
        ready: bool,
        /// BCID differed from the event's
        bcid_mismatch: bool,
    },
    /// Collided in `from` and was merged into the duplicate class.
    Rerouted {
        /// Class the collision happened in
        from: EventTag,
        /// Upstream event id
        event_id: u64,
        /// Duplicate event is complete
        ready: bool,
    },
    /// Collided in the duplicate class and was discarded.
    Dropped {
        /// Upstream event id
        event_id: u64,
    },
}

/// Merges fragments into per-class pending events.
#[derive(Debug)]
pub struct EventAssembler {
    num_channels: usize,
    bcid_tolerance: u16,
    run_number: u32,
    run_start: i64,
    tables: [PendingTable; TAG_COUNT],
    counters: BuilderCounters,
}

impl EventAssembler {
    /// Empty assembler for `config`.
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            num_channels: config.num_channels,
            bcid_tolerance: config.bcid_tolerance,
            run_number: 0,
            run_start: 0,
            tables: Default::default(),
            counters: BuilderCounters::default(),
        }
    }

    /// Begin a run.
    ///
    /// Counters and sequence numbers restart. Events still pending from a
    /// previous run are discarded; stop with a flush to keep them.
    ///
    /// Fails, leaving the assembler untouched, when `run_number` does not fit
    /// the 24-bit field of the event header.
    pub fn start(&mut self, run_number: u32, run_start: i64) -> AppResult<()> {
        if run_number > MAX_RUN_NUMBER {
            return Err(EvbError::RunNumber(run_number));
        }
        let discarded: usize = self.tables.iter().map(PendingTable::len).sum();
        if discarded > 0 {
            warn!(discarded, "Discarding events pending from the previous run");
        }
        self.tables = Default::default();
        self.counters = BuilderCounters::default();
        self.run_number = run_number;
        self.run_start = run_start;
        info!(run_number, run_start, "Assembler started");
        Ok(())
    }

    /// Current run number.
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Sources a physics event must collect.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Route and merge one fragment.
    pub fn merge(&mut self, fragment: Fragment, now_micros: u64) -> MergeOutcome {
        let route = RoutingPolicy::route(&fragment);
        if route.unknown_tag {
            self.counters.unknown_tags += 1;
            debug!(
                tag = fragment.tag(),
                source_id = fragment.source_id(),
                "Unknown fragment tag, treating as corrupted"
            );
        }
        if route.corrupted {
            self.counters.corrupted_fragments += 1;
            debug!(
                source_id = fragment.source_id(),
                event_id = fragment.event_id(),
                "Corrupted fragment"
            );
        }

        let event_id = fragment.event_id();
        let bucket = route.bucket;
        match self.merge_into(bucket, fragment, now_micros) {
            MergeResult::Merged { ready } => MergeOutcome::Merged {
                bucket,
                event_id,
                ready,
                bcid_mismatch: false,
            },
            MergeResult::MergedWithBcidMismatch { ready } => MergeOutcome::Merged {
                bucket,
                event_id,
                ready,
                bcid_mismatch: true,
            },
            MergeResult::DuplicateSource { fragment } => {
                self.counters.duplicate_sources += 1;
                self.reroute(bucket, fragment, now_micros)
            }
        }
    }

    fn reroute(&mut self, from: EventTag, mut fragment: Fragment, now_micros: u64) -> MergeOutcome {
        let event_id = fragment.event_id();
        let source_id = fragment.source_id();

        let Some(bucket) = RoutingPolicy::on_collision(from) else {
            return self.drop_duplicate(event_id, source_id);
        };

        warn!(
            class = %from,
            event_id,
            source_id,
            "Source already contributed to event, rerouting to duplicate"
        );
        fragment.add_status(EventStatus::DUPLICATE);
        match self.merge_into(bucket, fragment, now_micros) {
            MergeResult::Merged { ready } | MergeResult::MergedWithBcidMismatch { ready } => {
                MergeOutcome::Rerouted {
                    from,
                    event_id,
                    ready,
                }
            }
            MergeResult::DuplicateSource { .. } => {
                self.counters.duplicate_sources += 1;
                self.drop_duplicate(event_id, source_id)
            }
        }
    }

    fn drop_duplicate(&mut self, event_id: u64, source_id: u32) -> MergeOutcome {
        self.counters.dropped_duplicates += 1;
        error!(
            event_id,
            source_id,
            "Source already contributed to duplicate event, dropping fragment"
        );
        MergeOutcome::Dropped { event_id }
    }

    /// Merge `fragment` into the event with its upstream id in `bucket`,
    /// creating the event if needed.
    pub fn merge_into(&mut self, bucket: EventTag, fragment: Fragment, now_micros: u64) -> MergeResult {
        let index = bucket.index();
        let event_id = fragment.event_id();
        let run_number = self.run_number;
        let created = &mut self.counters.created[index];
        let arity = (bucket == EventTag::Physics).then_some(self.num_channels);

        let event = self.tables[index].get_or_insert_with(event_id, || {
            *created += 1;
            Event::new(bucket, run_number, *created, event_id, now_micros)
        });

        let full = arity.is_some_and(|n| event.fragment_count() >= n);
        if full || event.contains_source(fragment.source_id()) {
            return MergeResult::DuplicateSource { fragment };
        }

        let source_id = fragment.source_id();
        let fragment_bc_id = fragment.bc_id();
        let mismatch = event.push(fragment);
        let ready = arity.map_or(true, |n| event.fragment_count() >= n);
        let event_bc_id = event.bc_id();

        if ready {
            self.tables[index].mark_ready(event_id);
        }

        match mismatch {
            Some(distance) => {
                if distance > self.bcid_tolerance {
                    self.counters.bcid_mismatches += 1;
                    warn!(
                        class = %bucket,
                        event_id,
                        source_id,
                        event_bc_id,
                        fragment_bc_id,
                        "BCID mismatch"
                    );
                }
                MergeResult::MergedWithBcidMismatch { ready }
            }
            None => MergeResult::Merged { ready },
        }
    }

    /// Remove the complete events of `tag`, in upstream id order.
    pub fn take_ready(&mut self, tag: EventTag) -> Vec<Event> {
        self.tables[tag.index()].take_ready()
    }

    /// Pending table of `tag`.
    pub fn pending(&self, tag: EventTag) -> &PendingTable {
        &self.tables[tag.index()]
    }

    /// Number of events pending in `tag`.
    pub fn pending_len(&self, tag: EventTag) -> usize {
        self.tables[tag.index()].len()
    }

    /// Total pending events across all classes.
    pub fn total_pending(&self) -> usize {
        self.tables.iter().map(PendingTable::len).sum()
    }

    pub(crate) fn oldest_pending(&self, tag: EventTag) -> Option<&Event> {
        self.tables[tag.index()].oldest()
    }

    pub(crate) fn evict_oldest(&mut self, tag: EventTag) -> Option<Event> {
        self.tables[tag.index()].remove_oldest()
    }

    pub(crate) fn drain_pending(&mut self, tag: EventTag) -> Vec<Event> {
        self.tables[tag.index()].drain()
    }

    /// Count one event sent on the output of `tag`.
    pub fn record_emitted(&mut self, tag: EventTag) {
        self.counters.emitted[tag.index()] += 1;
    }

    /// Count a buffer that failed to decode.
    pub fn record_decode_error(&mut self) {
        self.counters.decode_errors += 1;
    }

    /// Count a failed receive call.
    pub fn record_receive_error(&mut self) {
        self.counters.receive_errors += 1;
    }

    /// Count an event the output refused.
    pub fn record_send_failure(&mut self) {
        self.counters.send_failures += 1;
    }

    pub(crate) fn counters_mut(&mut self) -> &mut BuilderCounters {
        &mut self.counters
    }

    /// Counters for the current run; pending gauges are not filled in.
    pub fn counters(&self) -> &BuilderCounters {
        &self.counters
    }

    /// Copy of all counters with current pending gauges.
    pub fn snapshot(&self, taken_at_micros: u64, health: HealthStatus) -> MetricsSnapshot {
        let mut counters = self.counters.clone();
        for tag in EventTag::ALL {
            counters.pending[tag.index()] = self.pending_len(tag) as u64;
        }
        MetricsSnapshot {
            run_number: self.run_number,
            run_start: self.run_start,
            taken_at_micros,
            health,
            counters,
        }
    }
}
