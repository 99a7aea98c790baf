//! Input and output channels.
//!
//! The dispatcher polls a [`FragmentSource`] without blocking and hands
//! serialized events to an [`EventSink`]. Two implementations ship with the
//! crate:
//!
//! - [`memory`]: tokio mpsc channels, for tests and in-process pipelines
//! - [`udp`]: one UDP socket per input channel, one destination per class

pub mod memory;
pub mod udp;

pub use memory::{
    memory_sink, memory_source, EmittedEvent, EventReceiver, FragmentSender, MemorySink,
    MemorySource,
};
pub use udp::{UdpSink, UdpSource, MAX_DATAGRAM_SIZE};

use crate::error::AppResult;
use bytes::Bytes;
use evb_format::EventTag;

/// Indexed set of input channels, each delivering whole fragment buffers.
pub trait FragmentSource: Send {
    /// Number of input channels.
    fn num_channels(&self) -> usize;

    /// Take the next buffer waiting on `channel`, if any. Must not block.
    fn try_receive(&mut self, channel: usize) -> AppResult<Option<Bytes>>;
}

/// Output channels, one per event class.
pub trait EventSink: Send {
    /// Send one serialized event on the output of `tag`.
    fn send(&mut self, tag: EventTag, event: Bytes) -> AppResult<()>;
}

impl<S: FragmentSource + ?Sized> FragmentSource for Box<S> {
    fn num_channels(&self) -> usize {
        (**self).num_channels()
    }

    fn try_receive(&mut self, channel: usize) -> AppResult<Option<Bytes>> {
        (**self).try_receive(channel)
    }
}

impl<K: EventSink + ?Sized> EventSink for Box<K> {
    fn send(&mut self, tag: EventTag, event: Bytes) -> AppResult<()> {
        (**self).send(tag, event)
    }
}
