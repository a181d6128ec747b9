//! Core error types.

use parley_proto::ProtocolError;
use thiserror::Error;

use crate::session::SessionState;

/// Errors from arena allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The aligned block would run past the arena capacity.
    #[error("arena overflow: requested {requested} bytes, {available} available")]
    Overflow {
        /// Requested block size.
        requested: usize,
        /// Bytes between the cursor and the capacity at the time of the call.
        available: usize,
    },
}

/// Errors from cipher primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The key stream needs at least one key byte.
    #[error("cipher key is empty")]
    EmptyKey,

    /// The output buffer cannot hold the result.
    #[error("output buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall {
        /// Required output length.
        needed: usize,
        /// Provided output length.
        actual: usize,
    },
}

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `initialize` was called on a session that already has a local key.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// The operation needs a local keypair first.
    #[error("session not initialized")]
    NotInitialized,

    /// The operation needs the remote key to be set.
    #[error("session not ready: state is {state:?}")]
    NotReady {
        /// State at the time of the call.
        state: SessionState,
    },

    /// A keypair failed validation.
    #[error("invalid keypair")]
    InvalidKeypair,

    /// An envelope is missing a field or has a field of the wrong size.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Which check failed.
        reason: String,
    },

    /// Arena allocation failed for this message.
    #[error("arena error: {0}")]
    Arena(#[from] ArenaError),

    /// Cipher primitive rejected its input.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

impl SessionError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors are ordering violations and bad key material: retrying
    /// the same call cannot succeed. Per-message failures are not fatal; the
    /// next message may go through.
    pub fn is_fatal(&self) -> bool {
        match self {
            // Fatal: programmer errors
            Self::AlreadyInitialized
            | Self::NotInitialized
            | Self::NotReady { .. }
            | Self::InvalidKeypair => true,

            // Fatal: no key material to work with
            Self::Cipher(CipherError::EmptyKey) => true,

            // Scoped to one message
            Self::MalformedEnvelope { .. }
            | Self::Arena(_)
            | Self::Cipher(CipherError::BufferTooSmall { .. }) => false,
        }
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        Self::MalformedEnvelope { reason: err.to_string() }
    }
}
