//! Fragment and event status bits.

use bitflags::bitflags;

bitflags! {
    /// Error and quality flags carried in the 16-bit status word.
    ///
    /// An event's status is the union of its fragments' status plus any bits
    /// the builder adds while assembling it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventStatus: u16 {
        /// Error without a more specific classification.
        const UNCLASSIFIED = 1 << 0;
        /// Bunch-crossing ids differ between fragments of one event.
        const BCID_MISMATCH = 1 << 1;
        /// Fragment tags differ within one event.
        const TAG_MISMATCH = 1 << 2;
        /// The front-end timed out reading its data.
        const TIMEOUT = 1 << 3;
        /// A buffer overflowed, in the front-end or in the builder.
        const OVERFLOW = 1 << 4;
        /// The fragment could not be decoded.
        const CORRUPTED = 1 << 5;
        /// Placeholder fragment without real data.
        const DUMMY = 1 << 6;
        /// At least one expected fragment never arrived.
        const MISSING = 1 << 7;
        /// The fragment carries no payload.
        const EMPTY = 1 << 8;
        /// The fragment's source was already present in its event.
        const DUPLICATE = 1 << 9;
    }
}

impl EventStatus {
    /// Interpret a raw status word, keeping bits this version does not name.
    pub fn from_wire(bits: u16) -> Self {
        Self::from_bits_retain(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_survive_round_trip_through_wire_word() {
        let status = EventStatus::from_wire(0x8000 | EventStatus::CORRUPTED.bits());
        assert!(status.contains(EventStatus::CORRUPTED));
        assert_eq!(status.bits(), 0x8020);
    }

    #[test]
    fn bit_positions_follow_front_end_definitions() {
        assert_eq!(EventStatus::BCID_MISMATCH.bits(), 0x0002);
        assert_eq!(EventStatus::CORRUPTED.bits(), 0x0020);
        assert_eq!(EventStatus::MISSING.bits(), 0x0080);
        assert_eq!(EventStatus::DUPLICATE.bits(), 0x0200);
    }
}
