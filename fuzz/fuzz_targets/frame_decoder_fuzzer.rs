//! Fuzz target for [`FrameDecoder`]
//!
//! # Strategy
//!
//! - Arbitrary byte streams split at arbitrary chunk boundaries
//! - Small receive capacities so oversized lengths are common
//!
//! # Invariants
//!
//! - Chunking never changes the emitted events
//! - `remaining()` is never zero
//! - Emitted payloads are non-empty and shorter than the capacity
//! - NEVER panic on any input

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_proto::{FrameDecoder, FrameEvent};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    capacity: u16,
    chunk_sizes: Vec<u8>,
    stream: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let capacity = usize::from(input.capacity).max(1);

    let expected = FrameDecoder::new(capacity).decode(&input.stream);

    let mut decoder = FrameDecoder::new(capacity);
    let mut events = Vec::new();
    let mut rest = input.stream.as_slice();
    let mut sizes = input.chunk_sizes.iter().cycle();

    while !rest.is_empty() {
        assert!(decoder.remaining() > 0);
        let size = sizes.next().map_or(rest.len(), |&s| usize::from(s).max(1)).min(rest.len());
        let (mut chunk, tail) = rest.split_at(size);
        rest = tail;

        while !chunk.is_empty() {
            let (used, event) = decoder.feed(chunk);
            assert!(used > 0);
            chunk = &chunk[used..];
            if let Some(event) = event {
                if let FrameEvent::Frame(payload) = &event {
                    assert!(!payload.is_empty());
                    assert!(payload.len() < capacity);
                }
                events.push(event);
            }
        }
    }

    assert_eq!(events, expected);
});
