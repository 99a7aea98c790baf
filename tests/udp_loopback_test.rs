//! Builder over real UDP sockets on the loopback interface.

use rust_evb::config::BuilderConfig;
use rust_evb::dispatcher::Dispatcher;
use rust_evb::emulator::{EmulatorConfig, FrontEndEmulator};
use rust_evb::format::{decode_event, EventTag};
use rust_evb::transport::{UdpSink, UdpSource};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

#[tokio::test]
async fn test_events_built_from_udp_inputs() -> anyhow::Result<()> {
    let loopback: SocketAddr = "127.0.0.1:0".parse()?;
    let source = UdpSource::bind(&[loopback, loopback]).await?;
    let inputs = source.local_addrs()?;

    let collector = UdpSocket::bind(loopback).await?;
    let mut outputs = BTreeMap::new();
    outputs.insert(EventTag::Physics, collector.local_addr()?);
    let sink = UdpSink::bind(outputs).await?;

    let mut config = BuilderConfig::with_channels(2);
    config.idle_backoff_ms = 1;
    config.stop_timeout_ms = 10;
    let mut dispatcher = Dispatcher::new(config, source, sink)?;
    let control = dispatcher.control();
    dispatcher.start(77)?;
    let handle = tokio::spawn(async move { dispatcher.run().await });

    let sender = UdpSocket::bind(loopback).await?;
    for (source_id, input) in inputs.iter().enumerate() {
        let mut emulator = FrontEndEmulator::with_seed(
            EmulatorConfig {
                source_id: source_id as u32,
                first_event_id: 500,
                ..Default::default()
            },
            source_id as u64,
        );
        sender.send_to(&emulator.next_buffer(0), *input).await?;
    }

    let mut buf = vec![0u8; 65_536];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), collector.recv_from(&mut buf))
        .await
        .expect("event should arrive")?;
    let event = decode_event(&bytes::Bytes::copy_from_slice(&buf[..len]))?;

    assert_eq!(event.header.event_tag, EventTag::Physics.as_u8());
    assert_eq!(event.header.run_number, 77);
    assert_eq!(event.header.fragment_count, 2);
    assert!(event.fragments.iter().all(|f| f.event_id() == 500));

    control.request_stop();
    let snapshot = handle.await??;
    assert_eq!(snapshot.emitted(EventTag::Physics), 1);
    Ok(())
}
