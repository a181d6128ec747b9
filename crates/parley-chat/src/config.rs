//! Endpoint configuration.

use std::{path::PathBuf, time::Duration};

use parley_core::DEFAULT_ARENA_CAPACITY;
use parley_proto::{DEFAULT_RECEIVE_CAPACITY, Envelope, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};

use crate::error::ChatError;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 9001;

/// Delay between retries of a would-block read or write.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Connection attempts before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Delay between connection attempts.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Socket read timeout. Bounds how long a blocked reader ignores shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Socket write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the peer to send its public key.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Input line that ends the chat.
pub const DEFAULT_EXIT_SENTINEL: &str = "exit";

/// Arena bytes needed for the local keypair and the peer public component.
const MIN_ARENA_CAPACITY: usize = 2 * PUBLIC_KEY_SIZE + SECRET_KEY_SIZE;

/// Configuration for one chat endpoint.
///
/// Both endpoints must agree on `receive_capacity`: the writer sizes its
/// messages for a peer that uses the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Name shown for messages from this endpoint.
    pub name: String,

    /// Name shown for messages from the peer.
    pub peer_name: String,

    /// Session arena size in bytes.
    pub arena_capacity: usize,

    /// Receive buffer size. Frames must be strictly shorter.
    pub receive_capacity: usize,

    /// Delay between retries of a would-block read or write.
    pub retry_delay: Duration,

    /// Connection attempts before giving up.
    pub connect_attempts: u32,

    /// Delay between connection attempts.
    pub connect_backoff: Duration,

    /// Socket read timeout; also the shutdown polling interval.
    pub poll_interval: Duration,

    /// Socket write timeout.
    pub write_timeout: Duration,

    /// Give up on the key exchange after this long.
    pub handshake_timeout: Duration,

    /// Close the session after this long without inbound bytes.
    pub idle_timeout: Option<Duration>,

    /// Input line that ends the chat.
    pub exit_sentinel: String,

    /// Append cleartext audit records here. Off by default.
    pub audit_log: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            name: "Server".to_string(),
            peer_name: "Client".to_string(),
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: None,
            exit_sentinel: DEFAULT_EXIT_SENTINEL.to_string(),
            audit_log: None,
        }
    }
}

impl ChatConfig {
    /// Set the local and peer display names.
    #[must_use]
    pub fn with_names(mut self, name: impl Into<String>, peer_name: impl Into<String>) -> Self {
        self.name = name.into();
        self.peer_name = peer_name.into();
        self
    }

    /// Longest line that fits in one frame.
    pub fn max_message_len(&self) -> usize {
        Envelope::max_plaintext_len(self.receive_capacity)
    }

    /// Reject settings the endpoint cannot run with.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.arena_capacity < MIN_ARENA_CAPACITY {
            return Err(config_error(format!(
                "arena capacity {} cannot hold key material ({MIN_ARENA_CAPACITY} bytes)",
                self.arena_capacity
            )));
        }
        if self.receive_capacity <= Envelope::MIN_ENCODED_SIZE + 1 {
            return Err(config_error(format!(
                "receive capacity {} cannot hold an envelope ({} bytes)",
                self.receive_capacity,
                Envelope::MIN_ENCODED_SIZE
            )));
        }
        if u32::try_from(self.receive_capacity).is_err() {
            return Err(config_error("receive capacity exceeds the length prefix range"));
        }
        if self.connect_attempts == 0 {
            return Err(config_error("connect attempts must be at least 1"));
        }
        if self.poll_interval.is_zero() || self.write_timeout.is_zero() {
            return Err(config_error("socket timeouts must be non-zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(config_error("handshake timeout must be non-zero"));
        }
        if self.idle_timeout.is_some_and(|idle| idle.is_zero()) {
            return Err(config_error("idle timeout must be non-zero"));
        }
        if self.exit_sentinel.is_empty() {
            return Err(config_error("exit sentinel must not be empty"));
        }
        Ok(())
    }
}

fn config_error(reason: impl Into<String>) -> ChatError {
    ChatError::Config { reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ChatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arena_capacity, 10 * 1024 * 1024);
        assert_eq!(config.receive_capacity, 1024);
        assert_eq!(config.max_message_len(), 975);
    }

    #[test]
    fn tiny_arena_is_rejected() {
        let config = ChatConfig { arena_capacity: 64, ..Default::default() };
        assert!(matches!(config.validate(), Err(ChatError::Config { .. })));
    }

    #[test]
    fn receive_capacity_must_fit_an_envelope() {
        let config = ChatConfig { receive_capacity: 49, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ChatConfig { receive_capacity: 50, ..Default::default() };
        assert!(config.validate().is_ok());
        assert_eq!(config.max_message_len(), 1);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = ChatConfig { poll_interval: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ChatConfig { idle_timeout: Some(Duration::ZERO), ..Default::default() };
        assert!(config.validate().is_err());

        let config = ChatConfig { handshake_timeout: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn with_names_sets_both() {
        let config = ChatConfig::default().with_names("alice", "bob");
        assert_eq!(config.name, "alice");
        assert_eq!(config.peer_name, "bob");
    }
}
