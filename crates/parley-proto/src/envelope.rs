//! Encrypted message envelope.
//!
//! An envelope is the unit produced by one `send_message` call. Inside a frame
//! payload it is laid out as:
//!
//! ```text
//! [nonce: 16][tag: 16][ciphertext: plaintext_len + 16]
//! ```
//!
//! The ciphertext carries a 16-byte zeroed trailer after the encrypted body,
//! so its length is always at least [`TRAILER_SIZE`]. Fixed-size fields come
//! first so the decoder never needs a second length prefix.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of a public key component in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a secret key component in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of the per-message nonce in bytes.
pub const NONCE_SIZE: usize = 16;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the trailer appended to every ciphertext.
pub const TRAILER_SIZE: usize = 16;

/// Encrypted message on the wire.
///
/// Fields are public so tests and tooling can build arbitrary (including
/// malformed) envelopes. [`Envelope::is_complete`] is the structural check
/// receivers run before any cryptographic work.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Fresh random value per message.
    pub nonce: Bytes,
    /// Encrypted body followed by the trailer.
    pub ciphertext: Bytes,
    /// Tag over the encrypted body.
    pub tag: Bytes,
}

impl Envelope {
    /// Smallest encoded envelope: empty plaintext.
    pub const MIN_ENCODED_SIZE: usize = NONCE_SIZE + TAG_SIZE + TRAILER_SIZE;

    /// Create an envelope from its parts.
    pub fn new(nonce: Bytes, ciphertext: Bytes, tag: Bytes) -> Self {
        Self { nonce, ciphertext, tag }
    }

    /// True if every field is present with a usable length.
    pub fn is_complete(&self) -> bool {
        self.nonce.len() == NONCE_SIZE
            && self.tag.len() == TAG_SIZE
            && self.ciphertext.len() >= TRAILER_SIZE
    }

    /// Length of the plaintext this envelope decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TRAILER_SIZE)
    }

    /// The encrypted body, without the trailer.
    pub fn body(&self) -> &[u8] {
        &self.ciphertext[..self.plaintext_len()]
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        self.nonce.len() + self.tag.len() + self.ciphertext.len()
    }

    /// Append the wire layout to `dst`.
    ///
    /// # Errors
    ///
    /// `InvalidFieldLength` if a field does not match the fixed layout.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        check_field("nonce", NONCE_SIZE, self.nonce.len(), self.nonce.len() == NONCE_SIZE)?;
        check_field("tag", TAG_SIZE, self.tag.len(), self.tag.len() == TAG_SIZE)?;
        check_field(
            "ciphertext",
            TRAILER_SIZE,
            self.ciphertext.len(),
            self.ciphertext.len() >= TRAILER_SIZE,
        )?;

        dst.reserve(self.encoded_len());
        dst.put_slice(&self.nonce);
        dst.put_slice(&self.tag);
        dst.put_slice(&self.ciphertext);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a frame payload.
    ///
    /// Fields are zero-copy slices of `payload`.
    ///
    /// # Errors
    ///
    /// `EnvelopeTooShort` if `payload` cannot hold the fixed fields and an
    /// empty ciphertext trailer.
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() < Self::MIN_ENCODED_SIZE {
            return Err(ProtocolError::EnvelopeTooShort {
                minimum: Self::MIN_ENCODED_SIZE,
                actual: payload.len(),
            });
        }

        let nonce = payload.slice(..NONCE_SIZE);
        let tag = payload.slice(NONCE_SIZE..NONCE_SIZE + TAG_SIZE);
        let ciphertext = payload.slice(NONCE_SIZE + TAG_SIZE..);

        Ok(Self { nonce, ciphertext, tag })
    }

    /// Largest plaintext whose envelope fits a receiver of `capacity` bytes.
    ///
    /// Frames must be strictly shorter than the receive capacity.
    pub fn max_plaintext_len(capacity: usize) -> usize {
        capacity.saturating_sub(1).saturating_sub(Self::MIN_ENCODED_SIZE)
    }
}

fn check_field(
    field: &'static str,
    expected: usize,
    actual: usize,
    ok: bool,
) -> Result<(), ProtocolError> {
    if ok { Ok(()) } else { Err(ProtocolError::InvalidFieldLength { field, expected, actual }) }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("nonce", &format_args!("[{} bytes]", self.nonce.len()))
            .field("ciphertext", &format_args!("[{} bytes]", self.ciphertext.len()))
            .field("tag", &format_args!("[{} bytes]", self.tag.len()))
            .finish()
    }
}
