//! UDP transport.
//!
//! Each input channel is its own socket, so one datagram is one fragment and
//! the channel index identifies the sender. Events go out as single datagrams
//! to the address configured for their class; classes without an address are
//! discarded.

use super::{EventSink, FragmentSource};
use crate::config::TransportConfig;
use crate::error::{AppResult, EvbError};
use bytes::Bytes;
use evb_format::EventTag;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Largest datagram accepted on input.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Input channels backed by UDP sockets.
#[derive(Debug)]
pub struct UdpSource {
    sockets: Vec<UdpSocket>,
    buf: Vec<u8>,
}

impl UdpSource {
    /// Bind one socket per address, in channel order.
    pub async fn bind(addrs: &[SocketAddr]) -> AppResult<Self> {
        let mut sockets = Vec::with_capacity(addrs.len());
        for (channel, addr) in addrs.iter().enumerate() {
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|e| EvbError::transport(channel, format!("bind {addr}: {e}")))?;
            info!(channel, addr = %socket.local_addr()?, "Input channel bound");
            sockets.push(socket);
        }
        Ok(Self {
            sockets,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    /// Actual bound addresses, useful when binding to port 0.
    pub fn local_addrs(&self) -> AppResult<Vec<SocketAddr>> {
        self.sockets
            .iter()
            .map(|s| s.local_addr().map_err(EvbError::from))
            .collect()
    }
}

impl FragmentSource for UdpSource {
    fn num_channels(&self) -> usize {
        self.sockets.len()
    }

    fn try_receive(&mut self, channel: usize) -> AppResult<Option<Bytes>> {
        let socket = self
            .sockets
            .get(channel)
            .ok_or_else(|| EvbError::transport(channel, "no such input channel"))?;
        match socket.try_recv_from(&mut self.buf) {
            Ok((len, _peer)) => Ok(Some(Bytes::copy_from_slice(&self.buf[..len]))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(EvbError::transport(channel, e.to_string())),
        }
    }
}

/// Output sink sending each class to its own address.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    outputs: BTreeMap<EventTag, SocketAddr>,
}

impl UdpSink {
    /// Bind an ephemeral socket for sending to `outputs`.
    pub async fn bind(outputs: BTreeMap<EventTag, SocketAddr>) -> AppResult<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
        for (tag, addr) in &outputs {
            info!(class = %tag, %addr, "Output channel configured");
        }
        Ok(Self { socket, outputs })
    }

    /// Sink for the outputs of a transport configuration.
    pub async fn from_config(config: &TransportConfig) -> AppResult<Self> {
        Self::bind(config.outputs.clone()).await
    }
}

impl EventSink for UdpSink {
    fn send(&mut self, tag: EventTag, event: Bytes) -> AppResult<()> {
        let Some(addr) = self.outputs.get(&tag) else {
            debug!(class = %tag, "No output configured, discarding event");
            return Ok(());
        };
        match self.socket.try_send_to(&event, *addr) {
            Ok(sent) if sent == event.len() => Ok(()),
            Ok(sent) => Err(EvbError::transport(
                tag.index(),
                format!("short send: {sent} of {} bytes", event.len()),
            )),
            Err(e) => Err(EvbError::transport(tag.index(), format!("send to {addr}: {e}"))),
        }
    }
}
