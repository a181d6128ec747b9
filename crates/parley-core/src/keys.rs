//! Keypair generation and validation.
//!
//! Key components live in the session arena. A keypair is generated by
//! drawing a random secret component and deriving the public component as
//! `secret ^ PUBLIC_MASK`. Both parties use the same mask, so
//!
//! ```text
//! derive(pk_b, sk_a) = sk_b ^ MASK ^ sk_a = derive(pk_a, sk_b)
//! ```
//!
//! and the two ends of a conversation agree on the shared key. With
//! independently random public components the XOR derivation would give
//! each side a different key. This relation is exactly why the scheme offers
//! no secrecy: the public component reveals the secret.

use std::fmt;

use bytes::Bytes;
use parley_proto::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};

use crate::{
    arena::{Arena, Block},
    env::Environment,
    error::ArenaError,
};

/// Mask relating a public component to its secret.
const PUBLIC_MASK: [u8; PUBLIC_KEY_SIZE] = *b"parley/placeholder-key-mixing/v1";

/// Owned keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Public component, shared with the peer.
    pub public: Bytes,
    /// Secret component.
    pub secret: Bytes,
}

impl KeyPair {
    /// Create a keypair from its components. No validation is done here.
    pub fn new(public: impl Into<Bytes>, secret: impl Into<Bytes>) -> Self {
        Self { public: public.into(), secret: secret.into() }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(&self.public))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Keypair whose components live in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaKeyPair {
    /// Block holding the public component.
    pub public: Block,
    /// Block holding the secret component.
    pub secret: Block,
}

impl ArenaKeyPair {
    /// Copy the components out of `arena`.
    pub fn to_key_pair(&self, arena: &Arena) -> KeyPair {
        KeyPair {
            public: Bytes::copy_from_slice(arena.bytes(self.public)),
            secret: Bytes::copy_from_slice(arena.bytes(self.secret)),
        }
    }
}

/// True iff both components have their declared lengths.
pub fn validate_keypair(kp: &KeyPair) -> bool {
    kp.public.len() == PUBLIC_KEY_SIZE && kp.secret.len() == SECRET_KEY_SIZE
}

/// Derive the public component for `secret`.
pub fn public_from_secret(secret: &[u8]) -> [u8; PUBLIC_KEY_SIZE] {
    let mut public = PUBLIC_MASK;
    for (p, s) in public.iter_mut().zip(secret) {
        *p ^= s;
    }
    public
}

/// Issues keypairs carved from an arena.
#[derive(Debug, Default)]
pub struct KeyManager {
    issued: u64,
}

impl KeyManager {
    /// Create a key manager with nothing issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keypairs generated so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Carve a fresh keypair from `arena`.
    ///
    /// # Errors
    ///
    /// `Overflow` if the arena cannot hold both components. Nothing is
    /// counted as issued and the cursor is rewound.
    pub fn generate_keypair<E: Environment>(
        &mut self,
        arena: &mut Arena,
        env: &E,
    ) -> Result<ArenaKeyPair, ArenaError> {
        let start = arena.pos();

        let public = arena.push(PUBLIC_KEY_SIZE, true)?;
        let secret = match arena.push(SECRET_KEY_SIZE, true) {
            Ok(block) => block,
            Err(e) => {
                arena.pop_to(start);
                return Err(e);
            },
        };

        env.random_bytes(arena.bytes_mut(secret));
        let derived = public_from_secret(arena.bytes(secret));
        arena.bytes_mut(public).copy_from_slice(&derived);

        self.issued += 1;
        tracing::debug!(issued = self.issued, "generated keypair");

        Ok(ArenaKeyPair { public, secret })
    }
}
