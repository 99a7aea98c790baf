//! Event fragments: one source's contribution to one trigger.
//!
//! A fragment on the wire is a packed little-endian header followed by an
//! opaque payload. The header may be longer than [`FRAGMENT_HEADER_SIZE`];
//! extension bytes are kept verbatim so a fragment re-encodes to exactly the
//! bytes it was decoded from.

use crate::error::{FormatError, FormatResult};
use crate::status::EventStatus;
use crate::tags::EventTag;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// First byte of every fragment.
pub const FRAGMENT_MARKER: u8 = 0xAA;
/// Fragment header version written by this crate.
pub const FRAGMENT_VERSION: u16 = 0x0001;
/// Size of the fixed fragment header in bytes.
pub const FRAGMENT_HEADER_SIZE: usize = 36;
/// Event id given to fragments whose real id could not be read.
pub const UNKNOWN_EVENT_ID: u64 = 0xFFFF_FFFF;
/// Bunch-crossing id given to fragments whose real id could not be read.
pub const UNKNOWN_BC_ID: u16 = 0xFFFF;

/// Fixed fragment header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Raw class tag as sent by the front-end.
    pub fragment_tag: u8,
    /// Trigger bits that fired for this event.
    pub trigger_bits: u16,
    /// Header format version.
    pub version_number: u16,
    /// Total header size including extension bytes.
    pub header_size: u16,
    /// Number of payload bytes after the header.
    pub payload_size: u32,
    /// Producing source (detector sub-system and board).
    pub source_id: u32,
    /// Upstream event id assigned by the source.
    pub event_id: u64,
    /// Bunch-crossing id.
    pub bc_id: u16,
    /// Status bits.
    pub status: EventStatus,
    /// Creation time at the source, microseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A decoded fragment with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    header: FragmentHeader,
    extension: Bytes,
    payload: Bytes,
}

impl Fragment {
    /// Build a fragment from its identifying fields.
    ///
    /// Trigger bits, status and timestamp start at zero; use the `with_*`
    /// methods to set them.
    pub fn new(
        fragment_tag: u8,
        source_id: u32,
        event_id: u64,
        bc_id: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            header: FragmentHeader {
                fragment_tag,
                trigger_bits: 0,
                version_number: FRAGMENT_VERSION,
                header_size: FRAGMENT_HEADER_SIZE as u16,
                payload_size: payload.len() as u32,
                source_id,
                event_id,
                bc_id,
                status: EventStatus::empty(),
                timestamp: 0,
            },
            extension: Bytes::new(),
            payload,
        }
    }

    /// Set the status bits.
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.header.status = status;
        self
    }

    /// Set the trigger bits.
    pub fn with_trigger_bits(mut self, trigger_bits: u16) -> Self {
        self.header.trigger_bits = trigger_bits;
        self
    }

    /// Set the source timestamp (microseconds since the Unix epoch).
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    /// Strictly decode a fragment from a received buffer.
    ///
    /// The payload and any header extension are zero-copy slices of `raw`.
    pub fn decode(raw: &Bytes) -> FormatResult<Self> {
        if raw.len() < FRAGMENT_HEADER_SIZE {
            return Err(FormatError::TooShort {
                what: "fragment",
                needed: FRAGMENT_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let mut cur = &raw[..FRAGMENT_HEADER_SIZE];
        let marker = cur.get_u8();
        if marker != FRAGMENT_MARKER {
            return Err(FormatError::BadMarker {
                what: "fragment",
                expected: FRAGMENT_MARKER,
                found: marker,
            });
        }

        let fragment_tag = cur.get_u8();
        let trigger_bits = cur.get_u16_le();
        let version_number = cur.get_u16_le();
        let header_size = cur.get_u16_le();
        let payload_size = cur.get_u32_le();
        let source_id = cur.get_u32_le();
        let event_id = cur.get_u64_le();
        let bc_id = cur.get_u16_le();
        let status = EventStatus::from_wire(cur.get_u16_le());
        let timestamp = cur.get_u64_le();

        if (header_size as usize) < FRAGMENT_HEADER_SIZE {
            return Err(FormatError::HeaderSize {
                what: "fragment",
                declared: header_size,
                minimum: FRAGMENT_HEADER_SIZE,
            });
        }

        let declared = header_size as usize + payload_size as usize;
        if declared != raw.len() {
            return Err(FormatError::LengthMismatch {
                what: "fragment",
                declared,
                actual: raw.len(),
            });
        }

        Ok(Self {
            header: FragmentHeader {
                fragment_tag,
                trigger_bits,
                version_number,
                header_size,
                payload_size,
                source_id,
                event_id,
                bc_id,
                status,
                timestamp,
            },
            extension: raw.slice(FRAGMENT_HEADER_SIZE..header_size as usize),
            payload: raw.slice(header_size as usize..),
        })
    }

    /// Append the wire form of this fragment to `out`.
    pub fn encode_into(&self, out: &mut BytesMut) {
        let h = &self.header;
        out.reserve(self.encoded_len());
        out.put_u8(FRAGMENT_MARKER);
        out.put_u8(h.fragment_tag);
        out.put_u16_le(h.trigger_bits);
        out.put_u16_le(h.version_number);
        out.put_u16_le(h.header_size);
        out.put_u32_le(h.payload_size);
        out.put_u32_le(h.source_id);
        out.put_u64_le(h.event_id);
        out.put_u16_le(h.bc_id);
        out.put_u16_le(h.status.bits());
        out.put_u64_le(h.timestamp);
        out.put_slice(&self.extension);
        out.put_slice(&self.payload);
    }

    /// Wire form of this fragment.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out.freeze()
    }

    /// Number of bytes [`Fragment::encode_into`] writes.
    pub fn encoded_len(&self) -> usize {
        FRAGMENT_HEADER_SIZE + self.extension.len() + self.payload.len()
    }

    /// Header fields.
    pub fn header(&self) -> &FragmentHeader {
        &self.header
    }

    /// Raw class tag.
    pub fn tag(&self) -> u8 {
        self.header.fragment_tag
    }

    /// Class tag, if it is one this version knows.
    pub fn event_tag(&self) -> Option<EventTag> {
        EventTag::from_u8(self.header.fragment_tag)
    }

    /// Producing source.
    pub fn source_id(&self) -> u32 {
        self.header.source_id
    }

    /// Upstream event id.
    pub fn event_id(&self) -> u64 {
        self.header.event_id
    }

    /// Bunch-crossing id.
    pub fn bc_id(&self) -> u16 {
        self.header.bc_id
    }

    /// Status bits.
    pub fn status(&self) -> EventStatus {
        self.header.status
    }

    /// Trigger bits.
    pub fn trigger_bits(&self) -> u16 {
        self.header.trigger_bits
    }

    /// Source timestamp in microseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Opaque payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// OR additional status bits into the fragment.
    pub fn add_status(&mut self, status: EventStatus) {
        self.header.status |= status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fragment {
        Fragment::new(EventTag::Physics.as_u8(), 0x02_0000, 42, 1234, vec![1u8, 2, 3, 4, 5])
            .with_trigger_bits(0x0003)
            .with_timestamp(1_600_000_000_000_000)
    }

    #[test]
    fn encoded_header_is_packed_little_endian() {
        let bytes = sample().to_bytes();

        assert_eq!(bytes.len(), FRAGMENT_HEADER_SIZE + 5);
        assert_eq!(bytes[0], FRAGMENT_MARKER);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(&bytes[2..4], &[0x03, 0x00]);
        assert_eq!(&bytes[6..8], &[FRAGMENT_HEADER_SIZE as u8, 0x00]);
        assert_eq!(&bytes[8..12], &5u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0x02_0000u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &42u64.to_le_bytes());
        assert_eq!(&bytes[24..26], &1234u16.to_le_bytes());
        assert_eq!(&bytes[36..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn decode_reads_back_every_field() {
        let original = sample().with_status(EventStatus::TIMEOUT);
        let decoded = Fragment::decode(&original.to_bytes()).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.event_tag(), Some(EventTag::Physics));
        assert!(decoded.status().contains(EventStatus::TIMEOUT));
    }

    #[test]
    fn header_extension_is_preserved() {
        let mut raw = BytesMut::new();
        sample().encode_into(&mut raw);
        // Grow header by 4 bytes of extension.
        let header_size = (FRAGMENT_HEADER_SIZE + 4) as u16;
        raw[6..8].copy_from_slice(&header_size.to_le_bytes());
        let payload = raw.split_off(FRAGMENT_HEADER_SIZE);
        raw.put_slice(&[9, 9, 9, 9]);
        raw.put_slice(&payload);
        let raw = raw.freeze();

        let decoded = Fragment::decode(&raw).unwrap();
        assert_eq!(decoded.payload().as_ref(), &[1, 2, 3, 4, 5]);
        assert_eq!(decoded.to_bytes(), raw);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Fragment::decode(&Bytes::from_static(&[FRAGMENT_MARKER, 0, 0])).unwrap_err();
        assert!(matches!(err, FormatError::TooShort { actual: 3, .. }));
    }

    #[test]
    fn wrong_marker_is_rejected() {
        let mut raw = BytesMut::new();
        sample().encode_into(&mut raw);
        raw[0] = 0xBB;
        let err = Fragment::decode(&raw.freeze()).unwrap_err();
        assert!(matches!(err, FormatError::BadMarker { found: 0xBB, .. }));
    }

    #[test]
    fn payload_size_mismatch_is_rejected() {
        let mut raw = BytesMut::new();
        sample().encode_into(&mut raw);
        raw.truncate(raw.len() - 2);
        let err = Fragment::decode(&raw.freeze()).unwrap_err();
        assert_eq!(
            err,
            FormatError::LengthMismatch {
                what: "fragment",
                declared: FRAGMENT_HEADER_SIZE + 5,
                actual: FRAGMENT_HEADER_SIZE + 3,
            }
        );
    }

    #[test]
    fn undersized_header_is_rejected() {
        let mut raw = BytesMut::new();
        sample().encode_into(&mut raw);
        raw[6..8].copy_from_slice(&8u16.to_le_bytes());
        let err = Fragment::decode(&raw.freeze()).unwrap_err();
        assert!(matches!(err, FormatError::HeaderSize { declared: 8, .. }));
    }
}
