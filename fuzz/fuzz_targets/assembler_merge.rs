//! Fuzz target for the assembler state machine.
//!
//! Tests:
//! - Arbitrary fragment streams never panic merge or sweep
//! - Every event leaves the assembler once: no (class, sequence id) pair is
//!   returned twice by the ready drain and the sweeper together
//! - Physics events never exceed the channel count
//! - Pending counts respect max_pending after every sweep

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rust_evb::assembler::{EventAssembler, TimeoutSweeper};
use rust_evb::config::BuilderConfig;
use rust_evb::format::{EventStatus, EventTag, Fragment};
use std::collections::HashSet;

#[derive(Debug, Arbitrary)]
struct Input {
    /// Channel count (1-16)
    channels: u8,
    /// Pending limit (0-32, 0 = unlimited)
    max_pending: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    /// Merge a fragment
    Merge {
        tag: u8,
        source_id: u8,
        event_id: u8,
        bc_id: u8,
        status: u16,
    },
    /// Advance time (ms) and run a drain + sweep cycle
    Cycle { advance_ms: u8 },
}

fuzz_target!(|input: Input| {
    let channels = usize::from(input.channels % 16) + 1;
    let mut config = BuilderConfig::with_channels(channels);
    config.timeout_ms = 50;
    config.max_pending = usize::from(input.max_pending % 33);

    let mut assembler = EventAssembler::new(&config);
    assembler.start(1, 0).unwrap();
    let sweeper = TimeoutSweeper::new(&config);
    let mut now = 0u64;
    let mut emitted = HashSet::new();

    for op in input.ops {
        match op {
            Op::Merge {
                tag,
                source_id,
                event_id,
                bc_id,
                status,
            } => {
                let fragment = Fragment::new(
                    tag,
                    u32::from(source_id),
                    u64::from(event_id),
                    u16::from(bc_id),
                    Bytes::new(),
                )
                .with_status(EventStatus::from_wire(status));
                assembler.merge(fragment, now);
            }
            Op::Cycle { advance_ms } => {
                now += u64::from(advance_ms) * 1_000;
                for tag in EventTag::ALL {
                    for event in assembler.take_ready(tag) {
                        if tag == EventTag::Physics {
                            assert_eq!(event.fragment_count(), channels);
                        }
                        assert!(emitted.insert((event.origin(), event.sequence_id())));
                    }
                }
                for event in sweeper.sweep(&mut assembler, now) {
                    assert!(emitted.insert((event.origin(), event.sequence_id())));
                }
                if config.max_pending > 0 {
                    for tag in EventTag::ALL {
                        assert!(assembler.pending_len(tag) <= config.max_pending);
                    }
                }
            }
        }
    }
});
