//! Fuzz target for fragment and event decoding.
//!
//! Tests:
//! - Arbitrary bytes never panic the strict decoders
//! - The never-failing decoder always yields a fragment
//! - Anything that decodes re-encodes to the same bytes

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rust_evb::assembler::FragmentDecoder;
use rust_evb::format::{decode_event, Fragment, FRAGMENT_HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    let raw = Bytes::copy_from_slice(data);

    if let Ok(fragment) = Fragment::decode(&raw) {
        assert_eq!(fragment.encoded_len(), raw.len());
        assert!(raw.len() >= FRAGMENT_HEADER_SIZE);
        assert_eq!(fragment.to_bytes(), raw);
    }

    let decoded = FragmentDecoder.decode(0, raw.clone(), 0);
    if decoded.error.is_some() {
        assert_eq!(decoded.fragment.payload(), &raw);
    }

    let _ = decode_event(&raw);
});
