//! Fuzz target for envelope decoding and message receipt
//!
//! # Strategy
//!
//! - Arbitrary frame payloads handed to [`Envelope::decode`]
//! - Decoded envelopes fed to an active session
//!
//! # Invariants
//!
//! - Short payloads are rejected, never sliced out of bounds
//! - A decoded envelope re-encodes to the same bytes
//! - Receipt either verifies, rejects, or reports a malformed envelope
//! - A rejected message leaves the arena cursor unchanged
//! - NEVER panic on any input

#![no_main]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_core::{Environment, Session};
use parley_proto::Envelope;

/// Deterministic environment: a counter-based byte stream.
#[derive(Clone)]
struct FuzzEnv(Arc<AtomicU64>);

impl Environment for FuzzEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for byte in buffer {
            *byte = self.0.fetch_add(1, Ordering::Relaxed).to_le_bytes()[0] ^ 0xA5;
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let payload = Bytes::copy_from_slice(data);
    let Ok(envelope) = Envelope::decode(payload.clone()) else {
        return;
    };
    assert_eq!(envelope.to_bytes().ok(), Some(payload));

    let env = FuzzEnv(Arc::new(AtomicU64::new(0)));
    let mut session = Session::new(env, 4096);
    if session.initialize().is_err() || session.set_remote_public_key(&[0x42; 32]).is_err() {
        return;
    }

    let before = session.arena().pos();
    match session.receive_message(&envelope) {
        Ok(result) if !result.verified() => assert_eq!(session.arena().pos(), before),
        Ok(_) | Err(_) => {},
    }
});
