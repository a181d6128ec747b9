//! Public key exchange.
//!
//! Before any frame is sent each side transmits its raw 32-byte public
//! component once. The listening side writes first and then reads; the
//! connecting side reads first and then writes, so neither side waits on the
//! other indefinitely.

use std::io::{Read, Write};

use parley_core::Environment;
use parley_proto::PUBLIC_KEY_SIZE;

use crate::{error::ChatError, transport::Retry};

/// Which side of the connection an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted the connection. Sends its key first.
    Server,
    /// Opened the connection. Receives the peer key first.
    Client,
}

impl Role {
    /// Default display name for this side.
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Server => "Server",
            Self::Client => "Client",
        }
    }

    /// The other side.
    pub fn peer(self) -> Self {
        match self {
            Self::Server => Self::Client,
            Self::Client => Self::Server,
        }
    }
}

/// Exchange public components over `stream`.
///
/// Returns the peer public component.
pub fn exchange_public_keys<S: Read + Write, E: Environment>(
    stream: &mut S,
    role: Role,
    local_public: &[u8],
    retry: &Retry<E>,
) -> Result<[u8; PUBLIC_KEY_SIZE], ChatError> {
    if local_public.len() != PUBLIC_KEY_SIZE {
        return Err(ChatError::Handshake {
            reason: format!(
                "local public key is {} bytes, expected {PUBLIC_KEY_SIZE}",
                local_public.len()
            ),
        });
    }

    let mut remote = [0u8; PUBLIC_KEY_SIZE];
    let result = match role {
        Role::Server => retry
            .write_all(stream, local_public)
            .and_then(|()| retry.read_exact(stream, &mut remote)),
        Role::Client => retry
            .read_exact(stream, &mut remote)
            .and_then(|()| retry.write_all(stream, local_public)),
    };

    result.map_err(|e| match e {
        ChatError::Closed => {
            ChatError::Handshake { reason: "peer closed before sending its key".to_string() }
        },
        ChatError::DeadlineExceeded => {
            ChatError::Handshake { reason: "timed out waiting for the peer key".to_string() }
        },
        other => other,
    })?;

    tracing::debug!(?role, "public keys exchanged");
    Ok(remote)
}
