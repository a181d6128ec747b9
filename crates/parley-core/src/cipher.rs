//! Chained XOR stream cipher and rolling-hash tag.
//!
//! # Security
//!
//! None of this is cryptography. The key derivation is a byte-wise XOR, the
//! cipher is a keyed running-state XOR, and the tag is a djb2-style hash with
//! no unforgeability guarantee. The algorithms are kept exactly so both
//! endpoints interoperate and so tests can pin their outputs; they must not
//! be relied on for confidentiality or integrity.
//!
//! # Cipher
//!
//! ```text
//! encrypt: state = (state + key[i % n]) ^ p[i];  c[i] = state
//! decrypt: p[i] = (state + key[i % n]) ^ c[i];  state = c[i]
//! ```
//!
//! Each ciphertext byte feeds the next step, so a corrupted ciphertext byte
//! garbles its own plaintext byte and never any earlier one.

use std::fmt;

use parley_proto::PUBLIC_KEY_SIZE;
pub use parley_proto::{NONCE_SIZE, TAG_SIZE, TRAILER_SIZE};

use crate::error::CipherError;

/// Size of every key component and of the shared key.
pub const KEY_SIZE: usize = PUBLIC_KEY_SIZE;

/// djb2 seed.
const TAG_SEED: u64 = 5381;

/// Symmetric key derived from one public and one secret component.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey([REDACTED])")
    }
}

/// XOR two key components into a shared key.
///
/// A placeholder for key agreement. Anyone who sees both public components
/// and knows how they relate to the secrets recovers the key.
pub fn derive_shared_key(pk_other: &[u8; KEY_SIZE], sk_self: &[u8; KEY_SIZE]) -> SharedKey {
    let mut key = [0u8; KEY_SIZE];
    for (out, (p, s)) in key.iter_mut().zip(pk_other.iter().zip(sk_self)) {
        *out = p ^ s;
    }
    SharedKey(key)
}

/// Encrypt `plaintext` into the first `plaintext.len()` bytes of `out`.
///
/// Bytes of `out` past the plaintext length are left untouched.
pub fn encrypt_into(out: &mut [u8], plaintext: &[u8], key: &[u8]) -> Result<(), CipherError> {
    check_buffers(out.len(), plaintext.len(), key)?;

    let mut state = 0u8;
    for (i, (c, &p)) in out.iter_mut().zip(plaintext).enumerate() {
        state = state.wrapping_add(key[i % key.len()]) ^ p;
        *c = state;
    }
    Ok(())
}

/// Decrypt `ciphertext` into the first `ciphertext.len()` bytes of `out`.
pub fn decrypt_into(out: &mut [u8], ciphertext: &[u8], key: &[u8]) -> Result<(), CipherError> {
    check_buffers(out.len(), ciphertext.len(), key)?;

    let mut state = 0u8;
    for (i, (p, &c)) in out.iter_mut().zip(ciphertext).enumerate() {
        *p = state.wrapping_add(key[i % key.len()]) ^ c;
        state = c;
    }
    Ok(())
}

/// Encrypt into a new buffer.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut out = vec![0; plaintext.len()];
    encrypt_into(&mut out, plaintext, key)?;
    Ok(out)
}

/// Decrypt into a new buffer.
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut out = vec![0; ciphertext.len()];
    decrypt_into(&mut out, ciphertext, key)?;
    Ok(out)
}

fn check_buffers(out_len: usize, in_len: usize, key: &[u8]) -> Result<(), CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    if out_len < in_len {
        return Err(CipherError::BufferTooSmall { needed: in_len, actual: out_len });
    }
    Ok(())
}

/// Rolling hash over `data` then `key`, spread over 16 bytes.
///
/// `hash = hash * 33 ^ byte` with wrapping 64-bit arithmetic, seeded with
/// 5381. The little-endian hash bytes fill the tag twice.
pub fn compute_tag(data: &[u8], key: &[u8; KEY_SIZE]) -> [u8; TAG_SIZE] {
    let hash = data
        .iter()
        .chain(key.iter())
        .fold(TAG_SEED, |hash, &b| hash.wrapping_mul(33) ^ u64::from(b));

    let hash_bytes = hash.to_le_bytes();
    let mut tag = [0u8; TAG_SIZE];
    for (i, t) in tag.iter_mut().enumerate() {
        *t = hash_bytes[i % hash_bytes.len()];
    }
    tag
}

/// True iff `tag` equals `compute_tag(data, key)`.
pub fn verify_tag(tag: &[u8], data: &[u8], key: &[u8; KEY_SIZE]) -> bool {
    let expected = compute_tag(data, key);
    tag.len() == TAG_SIZE && tag.iter().zip(&expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
