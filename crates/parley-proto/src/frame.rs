//! Length-prefixed framing.
//!
//! Each frame is a 4-byte unsigned length `N` in native byte order followed
//! by exactly `N` payload bytes. The receiver owns a bounded buffer of
//! `capacity` bytes:
//!
//! - `N == 0` is an empty message: nothing is emitted and the decoder waits
//!   for the next length prefix.
//! - `N >= capacity` is invalid: the 4 length bytes are discarded and the
//!   decoder resumes scanning for a length prefix. The stream is not closed.
//!
//! [`FrameDecoder`] is push-based and never asks for more bytes than the
//! current stage needs, so a reader can issue exact-size reads and never
//! consume bytes that belong to the next frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Receive buffer capacity. Frames with `N >= 1024` are rejected.
pub const DEFAULT_RECEIVE_CAPACITY: usize = 1024;

/// Encode a payload length as a native-order prefix.
pub fn length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE], ProtocolError> {
    let len = u32::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge { size: len })?;
    Ok(len.to_ne_bytes())
}

/// Append `[length][payload]` to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let prefix = length_prefix(payload.len())?;
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&prefix);
    dst.put_slice(payload);
    Ok(())
}

/// Outcome of completing a decode stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete payload.
    Frame(Bytes),

    /// A zero-length frame. Nothing to deliver.
    Empty,

    /// A length at or above the receive capacity. The prefix was discarded.
    Oversized {
        /// The rejected length value.
        length: u32,
    },
}

#[derive(Debug)]
enum DecodeState {
    Length { prefix: [u8; LENGTH_PREFIX_SIZE], filled: usize },
    Payload { expected: usize, buf: BytesMut },
}

impl DecodeState {
    fn length() -> Self {
        Self::Length { prefix: [0; LENGTH_PREFIX_SIZE], filled: 0 }
    }
}

/// Incremental frame decoder.
///
/// # Invariants
///
/// - `remaining() >= 1` at all times
/// - A payload buffer never grows past `capacity - 1` bytes
/// - After any event the decoder is back at a frame boundary
#[derive(Debug)]
pub struct FrameDecoder {
    capacity: usize,
    state: DecodeState,
}

impl FrameDecoder {
    /// Create a decoder with the given receive capacity.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: DecodeState::length() }
    }

    /// Receive capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload this decoder accepts.
    pub fn max_payload(&self) -> usize {
        self.capacity.saturating_sub(1)
    }

    /// Bytes still needed to finish the current stage.
    pub fn remaining(&self) -> usize {
        match &self.state {
            DecodeState::Length { filled, .. } => LENGTH_PREFIX_SIZE - filled,
            DecodeState::Payload { expected, buf } => expected - buf.len(),
        }
    }

    /// True if no partial frame is buffered.
    pub fn is_at_boundary(&self) -> bool {
        matches!(self.state, DecodeState::Length { filled: 0, .. })
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = DecodeState::length();
    }

    /// Consume bytes from `input` up to the end of the current stage.
    ///
    /// Returns the number of bytes consumed and the event produced when a
    /// stage completed. Bytes past the returned count were not looked at.
    pub fn feed(&mut self, input: &[u8]) -> (usize, Option<FrameEvent>) {
        match &mut self.state {
            DecodeState::Length { prefix, filled } => {
                let take = (LENGTH_PREFIX_SIZE - *filled).min(input.len());
                prefix[*filled..*filled + take].copy_from_slice(&input[..take]);
                *filled += take;

                if *filled < LENGTH_PREFIX_SIZE {
                    return (take, None);
                }

                let length = u32::from_ne_bytes(*prefix);
                let expected = usize::try_from(length).unwrap_or(usize::MAX);

                if expected == 0 {
                    self.reset();
                    (take, Some(FrameEvent::Empty))
                } else if expected >= self.capacity {
                    self.reset();
                    (take, Some(FrameEvent::Oversized { length }))
                } else {
                    self.state =
                        DecodeState::Payload { expected, buf: BytesMut::with_capacity(expected) };
                    (take, None)
                }
            },
            DecodeState::Payload { expected, buf } => {
                let take = (*expected - buf.len()).min(input.len());
                buf.extend_from_slice(&input[..take]);

                if buf.len() < *expected {
                    return (take, None);
                }

                let payload = std::mem::take(buf).freeze();
                self.reset();
                (take, Some(FrameEvent::Frame(payload)))
            },
        }
    }

    /// Decode every event contained in `input`.
    ///
    /// A trailing partial frame stays buffered for the next call.
    pub fn decode(&mut self, input: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < input.len() {
            let (used, event) = self.feed(&input[offset..]);
            offset += used;
            events.extend(event);
        }

        events
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_RECEIVE_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(payload, &mut buf).unwrap();
        buf
    }

    #[test]
    fn encode_writes_native_prefix() {
        let buf = frame(b"hey");
        assert_eq!(&buf[..4], &3u32.to_ne_bytes());
        assert_eq!(&buf[4..], b"hey");
    }

    #[test]
    fn decode_single_frame() {
        let mut decoder = FrameDecoder::default();
        let events = decoder.decode(&frame(b"hello"));
        assert_eq!(events, vec![FrameEvent::Frame(Bytes::from_static(b"hello"))]);
        assert!(decoder.is_at_boundary());
    }

    #[test]
    fn zero_length_frame_is_empty_event() {
        let mut decoder = FrameDecoder::default();
        let events = decoder.decode(&0u32.to_ne_bytes());
        assert_eq!(events, vec![FrameEvent::Empty]);
        assert!(decoder.is_at_boundary());
        assert_eq!(decoder.remaining(), LENGTH_PREFIX_SIZE);
    }

    #[test]
    fn length_at_capacity_is_oversized() {
        let mut decoder = FrameDecoder::new(16);
        let events = decoder.decode(&16u32.to_ne_bytes());
        assert_eq!(events, vec![FrameEvent::Oversized { length: 16 }]);

        // One below capacity is the largest accepted frame.
        let events = decoder.decode(&frame(&[7u8; 15]));
        assert_eq!(events, vec![FrameEvent::Frame(Bytes::from(vec![7u8; 15]))]);
    }

    #[test]
    fn remaining_tracks_stage() {
        let mut decoder = FrameDecoder::default();
        let buf = frame(b"abcdef");

        let (used, event) = decoder.feed(&buf[..2]);
        assert_eq!((used, event), (2, None));
        assert_eq!(decoder.remaining(), 2);

        let (used, event) = decoder.feed(&buf[2..]);
        assert_eq!((used, event), (2, None));
        assert_eq!(decoder.remaining(), 6);

        let (used, event) = decoder.feed(&buf[4..]);
        assert_eq!(used, 6);
        assert_eq!(event, Some(FrameEvent::Frame(Bytes::from_static(b"abcdef"))));
    }

    #[test]
    fn feed_never_reads_past_stage() {
        let mut decoder = FrameDecoder::default();
        let mut buf = frame(b"one");
        buf.extend_from_slice(&frame(b"two"));

        let (used, _) = decoder.feed(&buf);
        assert_eq!(used, LENGTH_PREFIX_SIZE);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.decode(&frame(b"partial")[..6]);
        assert!(!decoder.is_at_boundary());

        decoder.reset();
        assert!(decoder.is_at_boundary());
    }
}
