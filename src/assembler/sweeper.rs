//! Forced emission of stale and excess events.

use super::{Event, EventAssembler};
use crate::config::BuilderConfig;
use evb_format::{EventStatus, EventTag};
use tracing::{info, warn};

/// Evicts pending events that will not complete in time.
///
/// Once per dispatch cycle, for each class:
///
/// 1. If the oldest pending event is older than the timeout it is evicted
///    with the MISSING bit. Only one event per class goes per sweep, so a
///    burst of stale events drains over consecutive cycles.
/// 2. While the class holds more than `max_pending` events, the oldest is
///    evicted with MISSING and OVERFLOW.
///
/// Evicted events are reclassified as incomplete and returned for emission.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSweeper {
    timeout_micros: u64,
    max_pending: usize,
}

impl TimeoutSweeper {
    /// Sweeper for `config`.
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            timeout_micros: config.timeout_ms.saturating_mul(1_000),
            max_pending: config.max_pending,
        }
    }

    /// Evict stale and excess events across all classes.
    pub fn sweep(&self, assembler: &mut EventAssembler, now_micros: u64) -> Vec<Event> {
        let mut evicted = Vec::new();
        for tag in EventTag::ALL {
            if let Some(event) = self.sweep_stale(assembler, tag, now_micros) {
                evicted.push(event);
            }
            self.sweep_excess(assembler, tag, &mut evicted);
        }
        evicted
    }

    fn sweep_stale(
        &self,
        assembler: &mut EventAssembler,
        tag: EventTag,
        now_micros: u64,
    ) -> Option<Event> {
        let oldest = assembler.oldest_pending(tag)?;
        let age = now_micros.saturating_sub(oldest.created_at_micros());
        if age <= self.timeout_micros {
            return None;
        }

        let mut event = assembler.evict_oldest(tag)?;
        assembler.counters_mut().timeouts += 1;
        warn!(
            class = %tag,
            event_id = event.event_id(),
            sequence_id = event.sequence_id(),
            fragments = event.fragment_count(),
            expected = assembler.num_channels(),
            age_ms = age / 1_000,
            "Event timed out, sending as incomplete"
        );
        event.add_status(EventStatus::MISSING);
        event.reclassify(EventTag::Incomplete);
        Some(event)
    }

    fn sweep_excess(&self, assembler: &mut EventAssembler, tag: EventTag, out: &mut Vec<Event>) {
        if self.max_pending == 0 {
            return;
        }
        while assembler.pending_len(tag) > self.max_pending {
            let Some(mut event) = assembler.evict_oldest(tag) else {
                break;
            };
            assembler.counters_mut().overflows += 1;
            warn!(
                class = %tag,
                event_id = event.event_id(),
                max_pending = self.max_pending,
                "Too many pending events, sending oldest as incomplete"
            );
            event.add_status(EventStatus::MISSING | EventStatus::OVERFLOW);
            event.reclassify(EventTag::Incomplete);
            out.push(event);
        }
    }

    /// Evict everything still pending, oldest first per class.
    ///
    /// Used when a run stops with flushing enabled.
    pub fn flush(&self, assembler: &mut EventAssembler) -> Vec<Event> {
        let mut flushed = Vec::new();
        for tag in EventTag::ALL {
            for mut event in assembler.drain_pending(tag) {
                event.add_status(EventStatus::MISSING);
                event.reclassify(EventTag::Incomplete);
                flushed.push(event);
            }
        }
        if !flushed.is_empty() {
            info!(count = flushed.len(), "Flushing pending events as incomplete");
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evb_format::Fragment;

    const MS: u64 = 1_000;

    fn setup(channels: usize, timeout_ms: u64, max_pending: usize) -> (EventAssembler, TimeoutSweeper) {
        let mut config = BuilderConfig::with_channels(channels);
        config.timeout_ms = timeout_ms;
        config.max_pending = max_pending;
        let mut assembler = EventAssembler::new(&config);
        assembler.start(1, 0).unwrap();
        (assembler, TimeoutSweeper::new(&config))
    }

    fn physics(source_id: u32, event_id: u64) -> Fragment {
        Fragment::new(EventTag::Physics.as_u8(), source_id, event_id, 1, vec![0u8; 4])
    }

    #[test]
    fn stale_event_is_evicted_with_missing_bit() {
        let (mut asm, sweeper) = setup(3, 100, 0);
        asm.merge(physics(0, 1), 0);
        asm.merge(physics(1, 1), 0);

        assert!(sweeper.sweep(&mut asm, 100 * MS).is_empty());

        let evicted = sweeper.sweep(&mut asm, 150 * MS);
        assert_eq!(evicted.len(), 1);
        let event = &evicted[0];
        assert_eq!(event.tag(), EventTag::Incomplete);
        assert_eq!(event.origin(), EventTag::Physics);
        assert_eq!(event.fragment_count(), 2);
        assert!(event.status().contains(EventStatus::MISSING));
        assert_eq!(asm.counters().timeouts, 1);
        assert_eq!(asm.pending_len(EventTag::Physics), 0);
    }

    #[test]
    fn one_stale_event_per_class_per_sweep() {
        let (mut asm, sweeper) = setup(2, 10, 0);
        asm.merge(physics(0, 1), 0);
        asm.merge(physics(0, 2), 0);

        let first = sweeper.sweep(&mut asm, 50 * MS);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event_id(), 1);

        let second = sweeper.sweep(&mut asm, 50 * MS);
        assert_eq!(second[0].event_id(), 2);
        assert_eq!(asm.counters().timeouts, 2);
    }

    #[test]
    fn excess_events_are_evicted_oldest_first() {
        let (mut asm, sweeper) = setup(2, 1_000, 2);
        for id in [30, 10, 20, 40] {
            asm.merge(physics(0, id), 0);
        }

        let evicted = sweeper.sweep(&mut asm, 0);
        let ids: Vec<u64> = evicted.iter().map(Event::event_id).collect();
        assert_eq!(ids, vec![30, 10]);
        assert!(evicted
            .iter()
            .all(|e| e.status().contains(EventStatus::MISSING | EventStatus::OVERFLOW)));
        assert_eq!(asm.counters().overflows, 2);
        assert_eq!(asm.counters().timeouts, 0);
        assert_eq!(asm.pending_len(EventTag::Physics), 2);
    }

    #[test]
    fn flush_drains_all_classes() {
        let (mut asm, sweeper) = setup(2, 1_000, 0);
        asm.merge(physics(0, 1), 0);
        asm.merge(physics(0, 2), 0);

        let flushed = sweeper.flush(&mut asm);
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|e| e.tag() == EventTag::Incomplete));
        assert_eq!(asm.total_pending(), 0);
        assert_eq!(asm.counters().timeouts, 0);
    }
}
