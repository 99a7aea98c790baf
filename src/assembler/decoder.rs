//! Raw buffer to fragment.

use bytes::Bytes;
use evb_format::{EventStatus, EventTag, FormatError, Fragment, UNKNOWN_BC_ID, UNKNOWN_EVENT_ID};

/// Result of decoding one received buffer.
#[derive(Debug)]
pub struct Decoded {
    /// The fragment, or a corrupted stand-in when decoding failed.
    pub fragment: Fragment,
    /// Why decoding failed, if it did.
    pub error: Option<FormatError>,
}

/// Turns received buffers into fragments without ever failing.
///
/// A buffer that does not decode is wrapped in a stand-in fragment tagged
/// corrupted, attributed to the receiving channel, with sentinel ids and the
/// raw bytes as payload. Nothing received is ever discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentDecoder;

impl FragmentDecoder {
    /// Decode `raw`, received on `channel` at `now_micros`.
    pub fn decode(&self, channel: usize, raw: Bytes, now_micros: u64) -> Decoded {
        match Fragment::decode(&raw) {
            Ok(fragment) => Decoded {
                fragment,
                error: None,
            },
            Err(error) => Decoded {
                fragment: Fragment::new(
                    EventTag::Corrupted.as_u8(),
                    u32::try_from(channel).unwrap_or(u32::MAX),
                    UNKNOWN_EVENT_ID,
                    UNKNOWN_BC_ID,
                    raw,
                )
                .with_status(EventStatus::CORRUPTED)
                .with_timestamp(now_micros),
                error: Some(error),
            },
        }
    }
}
