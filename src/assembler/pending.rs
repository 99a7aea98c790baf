//! Per-class pending table and ready set.
//!
//! Events are owned by value, keyed by upstream event id. A second index on
//! the builder's sequence id records creation order, so "oldest" means the
//! event created first even when upstream ids restart.

use super::event::Event;
use std::collections::{BTreeMap, BTreeSet};

/// Pending events of one class.
#[derive(Debug, Default)]
pub struct PendingTable {
    events: BTreeMap<u64, Event>,
    by_creation: BTreeMap<u64, u64>,
    ready: BTreeSet<u64>,
}

impl PendingTable {
    /// Number of pending events, ready ones included.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if no event is pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pending event for an upstream id.
    pub fn get(&self, event_id: u64) -> Option<&Event> {
        self.events.get(&event_id)
    }

    /// Existing event for `event_id`, or a new one from `make`.
    pub(crate) fn get_or_insert_with(
        &mut self,
        event_id: u64,
        make: impl FnOnce() -> Event,
    ) -> &mut Event {
        let by_creation = &mut self.by_creation;
        self.events.entry(event_id).or_insert_with(|| {
            let event = make();
            by_creation.insert(event.sequence_id(), event_id);
            event
        })
    }

    /// Record that the event for `event_id` is complete.
    pub(crate) fn mark_ready(&mut self, event_id: u64) {
        if self.events.contains_key(&event_id) {
            self.ready.insert(event_id);
        }
    }

    /// True if the event for `event_id` is complete and awaiting emission.
    pub fn is_ready(&self, event_id: u64) -> bool {
        self.ready.contains(&event_id)
    }

    /// Remove every complete event, in increasing upstream id order.
    pub(crate) fn take_ready(&mut self) -> Vec<Event> {
        let ready = std::mem::take(&mut self.ready);
        ready
            .into_iter()
            .filter_map(|event_id| self.remove(event_id))
            .collect()
    }

    /// Earliest-created pending event.
    pub fn oldest(&self) -> Option<&Event> {
        self.by_creation
            .first_key_value()
            .and_then(|(_, event_id)| self.events.get(event_id))
    }

    /// Remove the earliest-created pending event.
    pub(crate) fn remove_oldest(&mut self) -> Option<Event> {
        let (_, event_id) = self.by_creation.first_key_value()?;
        let event_id = *event_id;
        self.ready.remove(&event_id);
        self.remove(event_id)
    }

    /// Remove every pending event, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<Event> {
        let order = std::mem::take(&mut self.by_creation);
        self.ready.clear();
        let mut events = std::mem::take(&mut self.events);
        order
            .into_values()
            .filter_map(|event_id| events.remove(&event_id))
            .collect()
    }

    fn remove(&mut self, event_id: u64) -> Option<Event> {
        let event = self.events.remove(&event_id)?;
        self.by_creation.remove(&event.sequence_id());
        Some(event)
    }
}
