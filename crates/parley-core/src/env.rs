//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (time, randomness, delays). This enables:
//!
//! - Deterministic tests: a seeded generator produces the same keys and
//!   nonces on every run, so failures reproduce exactly.
//!
//! - Production runtime: the chat binary plugs in a generator seeded once
//!   from OS entropy without any change to the session code.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and delays.
///
/// Every source of randomness the session uses flows through this trait;
/// there is no process-wide generator.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. Seeding: the generator behind `random_bytes()` is seeded once, either
///    from OS entropy (production) or from a fixed seed (tests)
/// 3. Minimal panics: Methods are infallible
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for the specified duration.
    ///
    /// Only driver code (retry loops, connect backoff) sleeps. Session logic
    /// never does.
    fn sleep(&self, duration: Duration);

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Determinism in tests: Given the same seed, this produces the same
    ///   sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for session IDs.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
