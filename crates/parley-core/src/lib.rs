//! Parley core: arena, cipher, keys and the session state machine.
//!
//! This crate is pure. It never touches sockets, threads or global state;
//! randomness comes in through [`Environment`].
//!
//! # Layers
//!
//! - [`arena`]: fixed-capacity bump allocator with checkpoint rewind
//! - [`cipher`]: chained XOR stream cipher and rolling-hash tag
//! - [`keys`]: keypair generation into the arena and validation
//! - [`session`]: `Created -> Initialized -> Active` state machine turning
//!   plaintext into envelopes and back
//! - [`audit`]: cleartext per-message records for an opt-in audit log
//!
//! # Security
//!
//! The cipher, tag and key derivation are non-cryptographic placeholders.
//! See [`cipher`] for details.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod arena;
pub mod audit;
pub mod cipher;
pub mod env;
pub mod error;
pub mod keys;
pub mod session;

pub use arena::{ARENA_ALIGN, ARENA_BASE_POS, Arena, ArenaStats, Block, DEFAULT_ARENA_CAPACITY};
pub use audit::{AuditRecord, Direction};
pub use env::Environment;
pub use error::{ArenaError, CipherError, SessionError};
pub use keys::{ArenaKeyPair, KeyManager, KeyPair, validate_keypair};
pub use session::{DecryptedResult, Session, SessionState, SessionStats};
