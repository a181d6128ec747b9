//! Parley wire protocol.
//!
//! Everything that crosses the byte stream between the two endpoints:
//!
//! - [`frame`]: `[4-byte length][payload]` framing with a bounded receive
//!   buffer and resynchronization on invalid lengths
//! - [`envelope`]: the encrypted message unit (nonce, ciphertext, tag) and its
//!   fixed layout inside a frame payload
//!
//! # Wire Format
//!
//! ```text
//! handshake: [32-byte public component]            (each direction, once)
//! frames:    [u32 length, native order][length bytes]
//! payload:   [nonce: 16][tag: 16][ciphertext: plaintext_len + 16]
//! ```
//!
//! The crate is Sans-IO: it never reads or writes a stream itself.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod frame;

pub use envelope::{Envelope, NONCE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, TAG_SIZE, TRAILER_SIZE};
pub use error::ProtocolError;
pub use frame::{
    DEFAULT_RECEIVE_CAPACITY, FrameDecoder, FrameEvent, LENGTH_PREFIX_SIZE, encode_frame,
    length_prefix,
};
