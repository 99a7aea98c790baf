//! Events under construction.

use evb_format::{EventStatus, EventTag, Fragment};

/// Aggregate of all fragments for one `(class, upstream event id)` pair.
///
/// Source ids inside one event are pairwise distinct; the assembler checks
/// this before every [`Event::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    tag: EventTag,
    origin: EventTag,
    run_number: u32,
    sequence_id: u64,
    event_id: u64,
    bc_id: u16,
    trigger_bits: u16,
    status: EventStatus,
    timestamp: u64,
    created_at_micros: u64,
    fragments: Vec<Fragment>,
}

impl Event {
    pub(crate) fn new(
        tag: EventTag,
        run_number: u32,
        sequence_id: u64,
        event_id: u64,
        created_at_micros: u64,
    ) -> Self {
        Self {
            tag,
            origin: tag,
            run_number,
            sequence_id,
            event_id,
            bc_id: 0,
            trigger_bits: 0,
            status: EventStatus::empty(),
            timestamp: 0,
            created_at_micros,
            fragments: Vec::new(),
        }
    }

    /// Append a fragment.
    ///
    /// The first fragment sets the event's reference BCID and timestamp. A
    /// later fragment with a different BCID sets the mismatch bit; the absolute
    /// difference is returned so the caller can apply its tolerance.
    pub(crate) fn push(&mut self, fragment: Fragment) -> Option<u16> {
        let mut mismatch = None;
        if self.fragments.is_empty() {
            self.bc_id = fragment.bc_id();
            self.timestamp = fragment.timestamp();
        } else if fragment.bc_id() != self.bc_id {
            self.status |= EventStatus::BCID_MISMATCH;
            mismatch = Some(self.bc_id.abs_diff(fragment.bc_id()));
        }
        self.status |= fragment.status();
        self.trigger_bits |= fragment.trigger_bits();
        self.fragments.push(fragment);
        mismatch
    }

    /// True if a fragment from `source_id` was already merged.
    pub fn contains_source(&self, source_id: u32) -> bool {
        self.fragments.iter().any(|f| f.source_id() == source_id)
    }

    pub(crate) fn add_status(&mut self, status: EventStatus) {
        self.status |= status;
    }

    /// Move the event to another output class, keeping its origin.
    pub(crate) fn reclassify(&mut self, tag: EventTag) {
        self.tag = tag;
    }

    /// Output class; also the tag written into the event header.
    pub fn tag(&self) -> EventTag {
        self.tag
    }

    /// Class the event was assembled in.
    pub fn origin(&self) -> EventTag {
        self.origin
    }

    /// Run number at creation.
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Builder-assigned sequence number, increasing per class.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Upstream event id shared by all fragments.
    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    /// Reference BCID from the first fragment.
    pub fn bc_id(&self) -> u16 {
        self.bc_id
    }

    /// OR of all fragments' trigger bits.
    pub fn trigger_bits(&self) -> u16 {
        self.trigger_bits
    }

    /// Union of fragment status and builder-added bits.
    pub fn status(&self) -> EventStatus {
        self.status
    }

    /// Source timestamp of the first fragment.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// When the builder created the event, in microseconds.
    pub fn created_at_micros(&self) -> u64 {
        self.created_at_micros
    }

    /// Merged fragments in merge order.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Number of merged fragments.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Encoded size of all fragments.
    pub fn payload_size(&self) -> usize {
        self.fragments.iter().map(Fragment::encoded_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(source_id: u32, bc_id: u16) -> Fragment {
        Fragment::new(0, source_id, 7, bc_id, vec![0u8; 4])
            .with_timestamp(1000 + u64::from(source_id))
            .with_trigger_bits(1 << source_id)
    }

    #[test]
    fn first_fragment_sets_reference_fields() {
        let mut event = Event::new(EventTag::Physics, 12, 1, 7, 55);
        assert_eq!(event.push(fragment(1, 300)), None);

        assert_eq!(event.bc_id(), 300);
        assert_eq!(event.timestamp(), 1001);
        assert!(event.contains_source(1));
        assert!(!event.contains_source(2));
    }

    #[test]
    fn bcid_mismatch_sets_bit_and_reports_distance() {
        let mut event = Event::new(EventTag::Physics, 12, 1, 7, 55);
        event.push(fragment(1, 300));

        assert_eq!(event.push(fragment(2, 300)), None);
        assert!(!event.status().contains(EventStatus::BCID_MISMATCH));

        assert_eq!(event.push(fragment(3, 296)), Some(4));
        assert!(event.status().contains(EventStatus::BCID_MISMATCH));
        assert_eq!(event.bc_id(), 300);
        assert_eq!(event.fragment_count(), 3);
    }

    #[test]
    fn status_and_trigger_bits_accumulate() {
        let mut event = Event::new(EventTag::Physics, 12, 1, 7, 55);
        event.push(fragment(1, 1).with_status(EventStatus::TIMEOUT));
        event.push(fragment(2, 1).with_status(EventStatus::EMPTY));

        assert_eq!(event.status(), EventStatus::TIMEOUT | EventStatus::EMPTY);
        assert_eq!(event.trigger_bits(), 0b110);
        assert_eq!(event.payload_size(), 2 * (evb_format::FRAGMENT_HEADER_SIZE + 4));
    }

    #[test]
    fn reclassify_keeps_origin() {
        let mut event = Event::new(EventTag::Calibration, 1, 1, 1, 0);
        event.reclassify(EventTag::Incomplete);
        assert_eq!(event.tag(), EventTag::Incomplete);
        assert_eq!(event.origin(), EventTag::Calibration);
    }
}
