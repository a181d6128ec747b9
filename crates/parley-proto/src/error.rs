//! Protocol error types.

use thiserror::Error;

/// Errors from encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload does not fit in a `u32` length prefix.
    #[error("payload too large for length prefix: {size} bytes")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// Frame payload is shorter than the fixed envelope layout.
    #[error("envelope too short: {actual} bytes, need at least {minimum}")]
    EnvelopeTooShort {
        /// Minimum encoded envelope size.
        minimum: usize,
        /// Received payload size.
        actual: usize,
    },

    /// An envelope field has the wrong length for encoding.
    #[error("invalid {field} length: expected {expected}, got {actual}")]
    InvalidFieldLength {
        /// Field name (`nonce`, `tag`, `ciphertext`).
        field: &'static str,
        /// Expected length (minimum length for `ciphertext`).
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}
