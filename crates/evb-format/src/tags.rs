//! Event class tags.
//!
//! Front-ends stamp every fragment with a one-byte class tag. The first four
//! values are the regular classes a front-end may produce; the remaining tags
//! are reserved for the event builder's own error streams.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of distinct tags, and therefore of output channels.
pub const TAG_COUNT: usize = 7;

/// Highest tag value a front-end is allowed to produce.
pub const MAX_REGULAR_TAG: u8 = EventTag::TlbMonitoring as u8;

/// Class of a fragment or an assembled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventTag {
    /// Triggered detector data, one fragment per readout channel.
    Physics = 0x00,
    /// Calibration data.
    Calibration = 0x01,
    /// Front-end monitoring data.
    Monitoring = 0x02,
    /// Trigger logic board monitoring data.
    TlbMonitoring = 0x03,
    /// Fragments that failed decoding or carried an unknown tag.
    Corrupted = 0x04,
    /// Events forced out before all fragments arrived.
    Incomplete = 0x05,
    /// Fragments whose source was already present in their event.
    Duplicate = 0x06,
}

impl EventTag {
    /// Every tag, ordered by wire value.
    pub const ALL: [EventTag; TAG_COUNT] = [
        EventTag::Physics,
        EventTag::Calibration,
        EventTag::Monitoring,
        EventTag::TlbMonitoring,
        EventTag::Corrupted,
        EventTag::Incomplete,
        EventTag::Duplicate,
    ];

    /// Parse a raw wire tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(EventTag::Physics),
            0x01 => Some(EventTag::Calibration),
            0x02 => Some(EventTag::Monitoring),
            0x03 => Some(EventTag::TlbMonitoring),
            0x04 => Some(EventTag::Corrupted),
            0x05 => Some(EventTag::Incomplete),
            0x06 => Some(EventTag::Duplicate),
            _ => None,
        }
    }

    /// Wire value of the tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Position of the tag in per-tag arrays, equal to its output channel.
    pub fn index(self) -> usize {
        self as usize
    }

    /// True for classes produced by front-ends.
    pub fn is_regular(self) -> bool {
        self.as_u8() <= MAX_REGULAR_TAG
    }

    /// Snake-case name, as used in configuration keys and log fields.
    pub fn name(self) -> &'static str {
        match self {
            EventTag::Physics => "physics",
            EventTag::Calibration => "calibration",
            EventTag::Monitoring => "monitoring",
            EventTag::TlbMonitoring => "tlb_monitoring",
            EventTag::Corrupted => "corrupted",
            EventTag::Incomplete => "incomplete",
            EventTag::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<EventTag> for u8 {
    fn from(tag: EventTag) -> Self {
        tag.as_u8()
    }
}
