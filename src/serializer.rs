//! Event wire serialization and emission.

use crate::assembler::Event;
use crate::error::AppResult;
use crate::transport::EventSink;
use bytes::{Bytes, BytesMut};
use evb_format::{EventHeader, FormatError, EVENT_HEADER_SIZE, EVENT_VERSION};
use tracing::trace;

/// Packs events as header plus fragments and hands them to a sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSerializer;

impl EventSerializer {
    /// Header describing `event`.
    ///
    /// The header's event id is the builder's sequence id.
    pub fn header(event: &Event) -> AppResult<EventHeader> {
        let fragment_count =
            u8::try_from(event.fragment_count()).map_err(|_| FormatError::FieldOverflow {
                field: "fragment_count",
                value: event.fragment_count() as u64,
            })?;
        let payload_size =
            u32::try_from(event.payload_size()).map_err(|_| FormatError::FieldOverflow {
                field: "payload_size",
                value: event.payload_size() as u64,
            })?;

        Ok(EventHeader {
            event_tag: event.tag().as_u8(),
            trigger_bits: event.trigger_bits(),
            version_number: EVENT_VERSION,
            header_size: EVENT_HEADER_SIZE as u16,
            payload_size,
            fragment_count,
            run_number: event.run_number(),
            event_id: event.sequence_id(),
            bc_id: event.bc_id(),
            status: event.status(),
            timestamp: event.timestamp(),
        })
    }

    /// Wire form of `event`: the header, then every fragment in merge order.
    pub fn serialize(&self, event: &Event) -> AppResult<Bytes> {
        let header = Self::header(event)?;
        let mut out = BytesMut::with_capacity(EVENT_HEADER_SIZE + event.payload_size());
        header.encode_into(&mut out)?;
        for fragment in event.fragments() {
            fragment.encode_into(&mut out);
        }
        Ok(out.freeze())
    }

    /// Serialize `event` and send it on the output of its class.
    ///
    /// Returns the number of bytes sent.
    pub fn emit<K: EventSink + ?Sized>(&self, event: &Event, sink: &mut K) -> AppResult<usize> {
        let bytes = self.serialize(event)?;
        let len = bytes.len();
        sink.send(event.tag(), bytes)?;
        trace!(
            class = %event.tag(),
            sequence_id = event.sequence_id(),
            bytes = len,
            "Event sent"
        );
        Ok(len)
    }
}
