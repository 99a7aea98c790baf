//! In-process channels backed by tokio mpsc.

use super::{EventSink, FragmentSource};
use crate::error::{AppResult, EvbError};
use bytes::Bytes;
use evb_format::EventTag;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Producer end of one input channel.
#[derive(Debug, Clone)]
pub struct FragmentSender {
    channel: usize,
    tx: UnboundedSender<Bytes>,
}

impl FragmentSender {
    /// Queue one raw buffer.
    pub fn send(&self, raw: impl Into<Bytes>) -> AppResult<()> {
        self.tx
            .send(raw.into())
            .map_err(|_| EvbError::transport(self.channel, "builder side closed"))
    }

    /// Index of the channel this sender feeds.
    pub fn channel(&self) -> usize {
        self.channel
    }
}

/// Input channels fed by [`FragmentSender`]s.
#[derive(Debug)]
pub struct MemorySource {
    receivers: Vec<UnboundedReceiver<Bytes>>,
}

/// Create `num_channels` input channels.
pub fn memory_source(num_channels: usize) -> (Vec<FragmentSender>, MemorySource) {
    let (senders, receivers) = (0..num_channels)
        .map(|channel| {
            let (tx, rx) = mpsc::unbounded_channel();
            (FragmentSender { channel, tx }, rx)
        })
        .unzip();
    (senders, MemorySource { receivers })
}

impl FragmentSource for MemorySource {
    fn num_channels(&self) -> usize {
        self.receivers.len()
    }

    fn try_receive(&mut self, channel: usize) -> AppResult<Option<Bytes>> {
        let rx = self
            .receivers
            .get_mut(channel)
            .ok_or_else(|| EvbError::transport(channel, "no such input channel"))?;
        match rx.try_recv() {
            Ok(raw) => Ok(Some(raw)),
            // A closed producer just means no more data on this channel.
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(None),
        }
    }
}

/// One event as delivered to an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    /// Output class
    pub tag: EventTag,
    /// Serialized event
    pub data: Bytes,
}

/// Sink that forwards every event to an [`EventReceiver`].
#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: UnboundedSender<EmittedEvent>,
}

/// Consumer end of a [`MemorySink`].
#[derive(Debug)]
pub struct EventReceiver {
    rx: UnboundedReceiver<EmittedEvent>,
}

/// Create an output sink and the receiver observing it.
pub fn memory_sink() -> (MemorySink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemorySink { tx }, EventReceiver { rx })
}

impl EventSink for MemorySink {
    fn send(&mut self, tag: EventTag, data: Bytes) -> AppResult<()> {
        self.tx
            .send(EmittedEvent { tag, data })
            .map_err(|_| EvbError::transport(tag.index(), "output receiver dropped"))
    }
}

impl EventReceiver {
    /// Wait for the next event; `None` once the sink is gone.
    pub async fn recv(&mut self) -> Option<EmittedEvent> {
        self.rx.recv().await
    }

    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<EmittedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_arrive_on_their_channel() {
        let (senders, mut source) = memory_source(2);
        senders[1].send(vec![1u8, 2]).unwrap();

        assert_eq!(source.num_channels(), 2);
        assert_eq!(source.try_receive(0).unwrap(), None);
        assert_eq!(
            source.try_receive(1).unwrap(),
            Some(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(source.try_receive(1).unwrap(), None);
    }

    #[test]
    fn out_of_range_channel_is_an_error() {
        let (_senders, mut source) = memory_source(1);
        assert!(matches!(
            source.try_receive(5),
            Err(EvbError::Transport { channel: 5, .. })
        ));
    }

    #[test]
    fn closed_sender_reads_as_empty() {
        let (senders, mut source) = memory_source(1);
        drop(senders);
        assert_eq!(source.try_receive(0).unwrap(), None);
    }

    #[test]
    fn sink_forwards_tag_and_bytes() {
        let (mut sink, mut receiver) = memory_sink();
        sink.send(EventTag::Monitoring, Bytes::from_static(b"evt")).unwrap();

        let events = receiver.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag, EventTag::Monitoring);
        assert_eq!(events[0].data, Bytes::from_static(b"evt"));

        drop(receiver);
        assert!(sink.send(EventTag::Physics, Bytes::new()).is_err());
    }
}
