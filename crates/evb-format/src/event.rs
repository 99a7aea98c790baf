//! Assembled event layout.
//!
//! An event on the wire is a packed little-endian header followed by the
//! wire form of every fragment it contains, in merge order.

use crate::error::{FormatError, FormatResult};
use crate::fragment::{Fragment, FRAGMENT_HEADER_SIZE};
use crate::status::EventStatus;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// First byte of every event.
pub const EVENT_MARKER: u8 = 0xBB;
/// Event header version written by this crate.
pub const EVENT_VERSION: u16 = 0x0001;
/// Size of the event header in bytes.
pub const EVENT_HEADER_SIZE: usize = 36;
/// Largest run number the 24-bit field can hold.
pub const MAX_RUN_NUMBER: u32 = 0x00FF_FFFF;

/// Event header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Output class of the event.
    pub event_tag: u8,
    /// OR of the trigger bits of all fragments.
    pub trigger_bits: u16,
    /// Header format version.
    pub version_number: u16,
    /// Header size in bytes.
    pub header_size: u16,
    /// Total size of the encoded fragments.
    pub payload_size: u32,
    /// Number of fragments that follow.
    pub fragment_count: u8,
    /// Run number, 24 bits on the wire.
    pub run_number: u32,
    /// Builder-assigned sequence number, per class.
    pub event_id: u64,
    /// Bunch-crossing id of the first fragment.
    pub bc_id: u16,
    /// Union of fragment status and builder-added bits.
    pub status: EventStatus,
    /// Timestamp of the first fragment, microseconds since the Unix epoch.
    pub timestamp: u64,
}

impl EventHeader {
    /// Append the packed header to `out`.
    ///
    /// Fails if the run number does not fit into 24 bits.
    pub fn encode_into(&self, out: &mut BytesMut) -> FormatResult<()> {
        if self.run_number > MAX_RUN_NUMBER {
            return Err(FormatError::FieldOverflow {
                field: "run_number",
                value: u64::from(self.run_number),
            });
        }

        out.reserve(EVENT_HEADER_SIZE);
        out.put_u8(EVENT_MARKER);
        out.put_u8(self.event_tag);
        out.put_u16_le(self.trigger_bits);
        out.put_u16_le(self.version_number);
        out.put_u16_le(self.header_size);
        out.put_u32_le(self.payload_size);
        out.put_u8(self.fragment_count);
        out.put_uint_le(u64::from(self.run_number), 3);
        out.put_u64_le(self.event_id);
        out.put_u16_le(self.bc_id);
        out.put_u16_le(self.status.bits());
        out.put_u64_le(self.timestamp);
        Ok(())
    }

    /// Decode the fixed header from the start of `raw`.
    pub fn decode(raw: &[u8]) -> FormatResult<Self> {
        if raw.len() < EVENT_HEADER_SIZE {
            return Err(FormatError::TooShort {
                what: "event",
                needed: EVENT_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let mut cur = &raw[..EVENT_HEADER_SIZE];
        let marker = cur.get_u8();
        if marker != EVENT_MARKER {
            return Err(FormatError::BadMarker {
                what: "event",
                expected: EVENT_MARKER,
                found: marker,
            });
        }

        let header = Self {
            event_tag: cur.get_u8(),
            trigger_bits: cur.get_u16_le(),
            version_number: cur.get_u16_le(),
            header_size: cur.get_u16_le(),
            payload_size: cur.get_u32_le(),
            fragment_count: cur.get_u8(),
            run_number: cur.get_uint_le(3) as u32,
            event_id: cur.get_u64_le(),
            bc_id: cur.get_u16_le(),
            status: EventStatus::from_wire(cur.get_u16_le()),
            timestamp: cur.get_u64_le(),
        };

        if (header.header_size as usize) < EVENT_HEADER_SIZE {
            return Err(FormatError::HeaderSize {
                what: "event",
                declared: header.header_size,
                minimum: EVENT_HEADER_SIZE,
            });
        }

        Ok(header)
    }
}

/// An emitted event split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Event header.
    pub header: EventHeader,
    /// Fragments in merge order.
    pub fragments: Vec<Fragment>,
}

/// Split an emitted event into its header and fragments.
pub fn decode_event(raw: &Bytes) -> FormatResult<DecodedEvent> {
    let header = EventHeader::decode(raw)?;

    let declared = header.header_size as usize + header.payload_size as usize;
    if declared != raw.len() {
        return Err(FormatError::LengthMismatch {
            what: "event",
            declared,
            actual: raw.len(),
        });
    }

    let mut fragments = Vec::with_capacity(header.fragment_count as usize);
    let mut offset = header.header_size as usize;
    while offset < raw.len() {
        let rest = &raw[offset..];
        if rest.len() < FRAGMENT_HEADER_SIZE {
            return Err(FormatError::TooShort {
                what: "fragment",
                needed: FRAGMENT_HEADER_SIZE,
                actual: rest.len(),
            });
        }
        let mut sizes = &rest[6..12];
        let fragment_len = sizes.get_u16_le() as usize + sizes.get_u32_le() as usize;
        let end = offset
            .checked_add(fragment_len)
            .filter(|end| *end <= raw.len())
            .ok_or(FormatError::LengthMismatch {
                what: "fragment",
                declared: fragment_len,
                actual: rest.len(),
            })?;
        fragments.push(Fragment::decode(&raw.slice(offset..end))?);
        offset = end;
    }

    if fragments.len() != header.fragment_count as usize {
        return Err(FormatError::FragmentCount {
            declared: header.fragment_count,
            found: fragments.len(),
        });
    }

    Ok(DecodedEvent { header, fragments })
}
