//! Session state machine.
//!
//! A `Session` is one endpoint's view of a two-party conversation. It owns
//! the endpoint arena, the local keypair and the peer's public component,
//! and turns plaintext into [`Envelope`]s and back.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐ initialize ┌─────────────┐ set_remote_* ┌────────┐
//! │ Created │───────────>│ Initialized │─────────────>│ Active │──┐
//! └─────────┘            └─────────────┘              └────────┘  │ set_remote_*
//!                                                         ^       │
//!                                                         └───────┘
//! ```
//!
//! Only `Active` sessions send or receive.
//!
//! # Arena Discipline
//!
//! Long-lived key material is allocated once and stays below the cursor.
//! Every send and receive saves a checkpoint, carves its scratch blocks,
//! copies the result out into owned `Bytes`, and restores the checkpoint,
//! also when the call fails. A session can therefore process any number of
//! messages without exhausting its arena.

use bytes::Bytes;
use parley_proto::{Envelope, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE, TRAILER_SIZE};

use crate::{
    arena::{Arena, Block},
    cipher::{self, KEY_SIZE, SharedKey},
    env::Environment,
    error::SessionError,
    keys::{ArenaKeyPair, KeyManager, KeyPair, validate_keypair},
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No local keypair yet.
    Created,
    /// Local keypair generated, peer key unknown.
    Initialized,
    /// Peer key set. Messages can flow.
    Active,
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages sent or received successfully.
    pub message_count: u64,
    /// Envelopes produced by `send_message`.
    pub messages_encrypted: u64,
    /// Envelopes accepted by `receive_message`.
    pub messages_decrypted: u64,
    /// Envelopes whose tag did not verify.
    pub verification_failures: u64,
}

/// Outcome of `receive_message`.
///
/// The plaintext is present only when the tag verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedResult {
    plaintext: Option<Bytes>,
}

impl DecryptedResult {
    fn verified_with(plaintext: Bytes) -> Self {
        Self { plaintext: Some(plaintext) }
    }

    fn rejected() -> Self {
        Self { plaintext: None }
    }

    /// True if the tag verified.
    pub fn verified(&self) -> bool {
        self.plaintext.is_some()
    }

    /// Decrypted bytes, if verified.
    pub fn plaintext(&self) -> Option<&[u8]> {
        self.plaintext.as_deref()
    }

    /// Take the decrypted bytes, if verified.
    pub fn into_plaintext(self) -> Option<Bytes> {
        self.plaintext
    }
}

/// One endpoint of a conversation.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for randomness
pub struct Session<E: Environment> {
    session_id: u64,
    env: E,
    arena: Arena,
    key_manager: KeyManager,
    state: SessionState,
    local: Option<ArenaKeyPair>,
    remote_public: Option<Block>,
    stats: SessionStats,
}

impl<E: Environment> Session<E> {
    /// Create a session with a fresh arena of `arena_capacity` bytes.
    pub fn new(env: E, arena_capacity: usize) -> Self {
        Self::with_arena(env, Arena::new(arena_capacity))
    }

    /// Create a session over an existing arena.
    pub fn with_arena(env: E, arena: Arena) -> Self {
        let session_id = env.random_u64();
        Self {
            session_id,
            env,
            arena,
            key_manager: KeyManager::new(),
            state: SessionState::Created,
            local: None,
            remote_public: None,
            stats: SessionStats::default(),
        }
    }

    /// Random identifier for log correlation.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Messages sent or received successfully.
    pub fn message_count(&self) -> u64 {
        self.stats.message_count
    }

    /// The session arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Keypairs issued by this session's key manager.
    pub fn keys_issued(&self) -> u64 {
        self.key_manager.issued()
    }

    /// Owned copy of the local keypair.
    pub fn local_keypair(&self) -> Option<KeyPair> {
        self.local.map(|kp| kp.to_key_pair(&self.arena))
    }

    /// Local public component, as sent during the handshake.
    pub fn local_public_key(&self) -> Option<Bytes> {
        self.local.map(|kp| Bytes::copy_from_slice(self.arena.bytes(kp.public)))
    }

    /// Peer public component, once set.
    pub fn remote_public_key(&self) -> Option<Bytes> {
        self.remote_public.map(|block| Bytes::copy_from_slice(self.arena.bytes(block)))
    }

    /// Generate the local keypair.
    ///
    /// # Errors
    ///
    /// - `AlreadyInitialized` outside `Created`
    /// - `Arena` if the arena cannot hold the keypair
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::AlreadyInitialized);
        }

        let keypair = self.key_manager.generate_keypair(&mut self.arena, &self.env)?;
        self.local = Some(keypair);
        self.state = SessionState::Initialized;

        tracing::info!(session_id = self.session_id, "session initialized");
        Ok(())
    }

    /// Set the peer keypair. Only its public component is kept.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` in `Created`
    /// - `InvalidKeypair` if either component has the wrong length
    pub fn set_remote_keypair(&mut self, keypair: &KeyPair) -> Result<(), SessionError> {
        self.require_initialized()?;

        if !validate_keypair(keypair) {
            return Err(SessionError::InvalidKeypair);
        }

        self.set_remote_public_key(&keypair.public)
    }

    /// Set the peer public component received during the handshake.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` in `Created`
    /// - `InvalidKeypair` if `public` is not exactly 32 bytes
    pub fn set_remote_public_key(&mut self, public: &[u8]) -> Result<(), SessionError> {
        self.require_initialized()?;

        if public.len() != PUBLIC_KEY_SIZE {
            return Err(SessionError::InvalidKeypair);
        }

        // Re-keying reuses the existing block so the arena does not grow.
        let block = match self.remote_public {
            Some(block) if block.len() == public.len() => {
                self.arena.bytes_mut(block).copy_from_slice(public);
                block
            },
            _ => self.arena.push_copy(public)?,
        };
        self.remote_public = Some(block);
        self.state = SessionState::Active;

        tracing::info!(session_id = self.session_id, "remote key set, session active");
        Ok(())
    }

    /// Encrypt `plaintext` for the peer.
    ///
    /// Draws a fresh nonce per call, so identical plaintexts yield distinct
    /// envelopes.
    ///
    /// # Errors
    ///
    /// - `NotReady` outside `Active`
    /// - `Arena` if the scratch blocks do not fit
    pub fn send_message(&mut self, plaintext: &[u8]) -> Result<Envelope, SessionError> {
        let (local, remote) = self.active_keys()?;
        let shared = self.shared_key(local.secret, remote)?;
        let tag_key = self.component(local.public)?;

        let envelope = self.with_scratch(|arena, env| {
            let nonce = arena.push(NONCE_SIZE, false)?;
            env.random_bytes(arena.bytes_mut(nonce));

            let ciphertext = arena.push(plaintext.len().saturating_add(TRAILER_SIZE), true)?;
            cipher::encrypt_into(arena.bytes_mut(ciphertext), plaintext, shared.as_bytes())?;

            let tag = arena.push(TAG_SIZE, true)?;
            let body = &arena.bytes(ciphertext)[..plaintext.len()];
            let computed = cipher::compute_tag(body, &tag_key);
            arena.bytes_mut(tag).copy_from_slice(&computed);

            Ok(Envelope::new(
                Bytes::copy_from_slice(arena.bytes(nonce)),
                Bytes::copy_from_slice(arena.bytes(ciphertext)),
                Bytes::copy_from_slice(arena.bytes(tag)),
            ))
        })?;

        self.stats.message_count += 1;
        self.stats.messages_encrypted += 1;

        tracing::debug!(
            session_id = self.session_id,
            len = plaintext.len(),
            count = self.stats.message_count,
            "message encrypted"
        );
        Ok(envelope)
    }

    /// Verify and decrypt an envelope from the peer.
    ///
    /// The tag is checked against the peer public component before any
    /// plaintext is produced. A bad tag is an expected outcome, not an error:
    /// it is counted and reported as an unverified result.
    ///
    /// # Errors
    ///
    /// - `NotReady` outside `Active`
    /// - `MalformedEnvelope` if a field is missing or mis-sized
    /// - `Arena` if the plaintext block does not fit
    pub fn receive_message(
        &mut self,
        envelope: &Envelope,
    ) -> Result<DecryptedResult, SessionError> {
        let (local, remote) = self.active_keys()?;

        if !envelope.is_complete() {
            return Err(SessionError::MalformedEnvelope { reason: describe_incomplete(envelope) });
        }

        let remote_public = self.component(remote)?;
        if !cipher::verify_tag(&envelope.tag, envelope.body(), &remote_public) {
            self.stats.verification_failures += 1;
            tracing::warn!(
                session_id = self.session_id,
                failures = self.stats.verification_failures,
                "tag verification failed"
            );
            return Ok(DecryptedResult::rejected());
        }

        let shared = self.shared_key(local.secret, remote)?;
        let plaintext = self.with_scratch(|arena, _env| {
            let body = envelope.body();
            let out = arena.push(body.len(), true)?;
            cipher::decrypt_into(arena.bytes_mut(out), body, shared.as_bytes())?;
            Ok(Bytes::copy_from_slice(arena.bytes(out)))
        })?;

        self.stats.message_count += 1;
        self.stats.messages_decrypted += 1;

        tracing::debug!(
            session_id = self.session_id,
            len = plaintext.len(),
            count = self.stats.message_count,
            "message decrypted"
        );
        Ok(DecryptedResult::verified_with(plaintext))
    }

    fn require_initialized(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Created => Err(SessionError::NotInitialized),
            SessionState::Initialized | SessionState::Active => Ok(()),
        }
    }

    fn active_keys(&self) -> Result<(ArenaKeyPair, Block), SessionError> {
        match (self.state, self.local, self.remote_public) {
            (SessionState::Active, Some(local), Some(remote)) => Ok((local, remote)),
            (state, ..) => Err(SessionError::NotReady { state }),
        }
    }

    fn component(&self, block: Block) -> Result<[u8; KEY_SIZE], SessionError> {
        <[u8; KEY_SIZE]>::try_from(self.arena.bytes(block))
            .map_err(|_| SessionError::InvalidKeypair)
    }

    fn shared_key(
        &self,
        local_secret: Block,
        remote_public: Block,
    ) -> Result<SharedKey, SessionError> {
        let secret = self.component(local_secret)?;
        let public = self.component(remote_public)?;
        Ok(cipher::derive_shared_key(&public, &secret))
    }

    /// Run `f` between a checkpoint save and restore.
    fn with_scratch<T>(
        &mut self,
        f: impl FnOnce(&mut Arena, &E) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        self.arena.save_checkpoint();
        let result = f(&mut self.arena, &self.env);
        self.arena.restore_checkpoint();
        result
    }
}

fn describe_incomplete(envelope: &Envelope) -> String {
    if envelope.nonce.len() != NONCE_SIZE {
        format!("nonce is {} bytes, expected {NONCE_SIZE}", envelope.nonce.len())
    } else if envelope.tag.len() != TAG_SIZE {
        format!("tag is {} bytes, expected {TAG_SIZE}", envelope.tag.len())
    } else {
        format!(
            "ciphertext is {} bytes, expected at least {TRAILER_SIZE}",
            envelope.ciphertext.len()
        )
    }
}

impl<E: Environment> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}
