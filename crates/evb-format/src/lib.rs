//! `evb-format`
//!
//! Wire-format types shared by front-end receivers and the event builder.
//!
//! - [`Fragment`]: one source's data for one trigger, with strict decoding.
//! - [`EventHeader`] and [`decode_event`]: the assembled event layout.
//! - [`EventTag`]: the one-byte class tag, which also selects output channels.
//! - [`EventStatus`]: the 16-bit status word.
//!
//! All integers are little-endian and all structures are packed.

pub mod error;
pub mod event;
pub mod fragment;
pub mod status;
pub mod tags;

pub use error::{FormatError, FormatResult};
pub use event::{
    decode_event, DecodedEvent, EventHeader, EVENT_HEADER_SIZE, EVENT_MARKER, EVENT_VERSION,
    MAX_RUN_NUMBER,
};
pub use fragment::{
    Fragment, FragmentHeader, FRAGMENT_HEADER_SIZE, FRAGMENT_MARKER, FRAGMENT_VERSION,
    UNKNOWN_BC_ID, UNKNOWN_EVENT_ID,
};
pub use status::EventStatus;
pub use tags::{EventTag, MAX_REGULAR_TAG, TAG_COUNT};
