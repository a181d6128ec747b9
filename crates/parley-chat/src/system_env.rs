//! Production Environment implementation using system time and RNG.
//!
//! This module provides `SystemEnv`, the production implementation of the
//! `Environment` trait: wall-clock time, blocking thread sleeps, and a
//! ChaCha20 generator seeded once per process from OS entropy.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::error::ChatError;

/// Production environment using system time and a seeded ChaCha20 RNG.
///
/// Clones share one generator, so the reader and writer threads of an
/// endpoint draw from a single stream and never repeat a nonce.
#[derive(Clone)]
pub struct SystemEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SystemEnv {
    /// Seed the generator from `getrandom`.
    pub fn from_entropy() -> Result<Self, ChatError> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed).map_err(|e| ChatError::Entropy { reason: e.to_string() })?;
        Ok(Self::from_rng(ChaCha20Rng::from_seed(seed)))
    }

    /// Seed the generator with a fixed value for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(ChaCha20Rng::seed_from_u64(seed))
    }

    fn from_rng(rng: ChaCha20Rng) -> Self {
        Self { rng: Arc::new(Mutex::new(rng)) }
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().fill_bytes(buffer);
    }
}

impl fmt::Debug for SystemEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemEnv").finish_non_exhaustive()
    }
}
