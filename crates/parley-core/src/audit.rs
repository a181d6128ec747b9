//! Per-message audit records.
//!
//! A record captures what one endpoint did with one message: who sent it,
//! the plaintext, and a hex preview of the wire fields. Records contain the
//! plaintext in the clear. Whatever persists them defeats the encryption
//! layer, which is why persisting them is opt-in.

use parley_proto::Envelope;

/// Bytes of ciphertext shown in the preview.
pub const PREVIEW_BYTES: usize = 32;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Encrypted and sent by this endpoint.
    Sent,
    /// Received and verified by this endpoint.
    Received,
}

/// Cleartext description of one processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Which way the message travelled.
    pub direction: Direction,
    /// Local endpoint name.
    pub local: String,
    /// Peer endpoint name.
    pub peer: String,
    /// Message text, lossily decoded as UTF-8.
    pub plaintext: String,
    /// Hex of the first 32 ciphertext bytes, `...` appended if truncated.
    pub ciphertext_preview_hex: String,
    /// Hex of the nonce.
    pub nonce_hex: String,
    /// Hex of the tag.
    pub tag_hex: String,
    /// Plaintext length in bytes.
    pub data_len: usize,
}

impl AuditRecord {
    /// Build a record for `envelope` carrying `plaintext`.
    pub fn new(
        direction: Direction,
        local: impl Into<String>,
        peer: impl Into<String>,
        plaintext: &[u8],
        envelope: &Envelope,
    ) -> Self {
        Self {
            direction,
            local: local.into(),
            peer: peer.into(),
            plaintext: String::from_utf8_lossy(plaintext).into_owned(),
            ciphertext_preview_hex: preview_hex(&envelope.ciphertext),
            nonce_hex: hex::encode(&envelope.nonce),
            tag_hex: hex::encode(&envelope.tag),
            data_len: plaintext.len(),
        }
    }

    /// Render as one log line after `timestamp`.
    ///
    /// ```text
    /// [ts] | alice -> bob | text | 1f2e... | XOR-Chain | Nonce: .. | Tag: .. | Data Length: 4B
    /// ```
    pub fn to_line(&self, timestamp: &str) -> String {
        let route = match self.direction {
            Direction::Sent => format!("{} -> {}", self.local, self.peer),
            Direction::Received => format!("{} <- {} (RECEIVED)", self.local, self.peer),
        };

        format!(
            "[{timestamp}] | {route} | {} | {} | 256-bit XOR-Chain | Nonce: {} | Tag: {} | Data Length: {}B",
            self.plaintext, self.ciphertext_preview_hex, self.nonce_hex, self.tag_hex, self.data_len,
        )
    }
}

fn preview_hex(data: &[u8]) -> String {
    let shown = data.len().min(PREVIEW_BYTES);
    let mut preview = hex::encode(&data[..shown]);
    if data.len() > PREVIEW_BYTES {
        preview.push_str("...");
    }
    preview
}
