//! Chat endpoint error types.

use std::io;

use parley_core::SessionError;
use parley_proto::ProtocolError;
use thiserror::Error;

/// Errors from running a chat endpoint.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Configuration is unusable.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Which setting is wrong.
        reason: String,
    },

    /// OS entropy could not seed the generator.
    #[error("entropy source unavailable: {reason}")]
    Entropy {
        /// Error reported by the OS.
        reason: String,
    },

    /// Every connection attempt failed.
    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    ConnectFailed {
        /// Peer address.
        addr: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: io::Error,
    },

    /// Public key exchange failed.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// Description of the failure.
        reason: String,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Local shutdown interrupted a blocking operation.
    #[error("shutdown requested")]
    Shutdown,

    /// A blocking operation ran past its timeout.
    #[error("operation timed out")]
    DeadlineExceeded,

    /// A worker thread panicked.
    #[error("{name} thread panicked")]
    WorkerPanicked {
        /// Thread name.
        name: &'static str,
    },

    /// Session rejected an operation.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Wire encoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChatError {
    /// Returns true if the endpoint stopped for an expected reason.
    pub fn is_orderly(&self) -> bool {
        matches!(self, Self::Closed | Self::Shutdown)
    }
}
