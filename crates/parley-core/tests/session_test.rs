//! End-to-end session tests: two endpoints exchanging envelopes in-process.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use parley_core::{
    Environment, Session, SessionError, SessionState,
    cipher::{self, KEY_SIZE},
};
use parley_proto::{Envelope, FrameDecoder, FrameEvent, encode_frame};
use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Clone)]
struct TestEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl TestEnv {
    fn seeded(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Environment for TestEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, _duration: Duration) {}

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

/// Two sessions that exchanged full keypairs.
fn connected(seed: u64) -> (Session<TestEnv>, Session<TestEnv>) {
    let mut a = Session::new(TestEnv::seeded(seed), 64 * 1024);
    let mut b = Session::new(TestEnv::seeded(seed.wrapping_add(1)), 64 * 1024);

    a.initialize().unwrap();
    b.initialize().unwrap();

    let a_keys = a.local_keypair().unwrap();
    let b_keys = b.local_keypair().unwrap();
    a.set_remote_keypair(&b_keys).unwrap();
    b.set_remote_keypair(&a_keys).unwrap();

    (a, b)
}

#[test]
fn hello_end_to_end() {
    let (mut a, mut b) = connected(7);
    assert_eq!(a.state(), SessionState::Active);
    assert_eq!(b.state(), SessionState::Active);

    let envelope = a.send_message(b"hello").unwrap();
    let result = b.receive_message(&envelope).unwrap();

    assert!(result.verified());
    assert_eq!(result.into_plaintext(), Some(Bytes::from_static(b"hello")));
    assert_eq!(a.message_count(), 1);
    assert_eq!(b.message_count(), 1);
    assert_eq!(a.stats().messages_encrypted, 1);
    assert_eq!(b.stats().messages_decrypted, 1);
}

#[test]
fn conversation_in_both_directions() {
    let (mut a, mut b) = connected(11);

    for round in 0..20u32 {
        let ping = format!("ping {round}");
        let envelope = a.send_message(ping.as_bytes()).unwrap();
        assert_eq!(b.receive_message(&envelope).unwrap().plaintext(), Some(ping.as_bytes()));

        let pong = format!("pong {round}");
        let envelope = b.send_message(pong.as_bytes()).unwrap();
        assert_eq!(a.receive_message(&envelope).unwrap().plaintext(), Some(pong.as_bytes()));
    }

    assert_eq!(a.message_count(), 40);
    assert_eq!(b.message_count(), 40);
}

#[test]
fn envelope_survives_the_wire() {
    let (mut a, mut b) = connected(3);
    let envelope = a.send_message("unicode: żółw 🐢".as_bytes()).unwrap();

    let mut stream = BytesMut::new();
    encode_frame(&envelope.to_bytes().unwrap(), &mut stream).unwrap();

    let events = FrameDecoder::default().decode(&stream);
    let [FrameEvent::Frame(payload)] = events.as_slice() else {
        panic!("expected one frame, got {events:?}");
    };

    let decoded = Envelope::decode(payload.clone()).unwrap();
    let result = b.receive_message(&decoded).unwrap();
    assert_eq!(result.plaintext(), Some("unicode: żółw 🐢".as_bytes()));
}

#[test]
fn empty_plaintext_round_trips() {
    let (mut a, mut b) = connected(5);
    let envelope = a.send_message(b"").unwrap();
    let result = b.receive_message(&envelope).unwrap();
    assert!(result.verified());
    assert_eq!(result.plaintext(), Some(&b""[..]));
}

#[test]
fn tampered_ciphertext_is_rejected_before_decrypt() {
    let (mut a, mut b) = connected(9);
    let envelope = a.send_message(b"transfer 10 coins").unwrap();

    let mut ciphertext = envelope.ciphertext.to_vec();
    ciphertext[9] ^= 0x04;
    let tampered = Envelope::new(envelope.nonce.clone(), Bytes::from(ciphertext), envelope.tag);

    let result = b.receive_message(&tampered).unwrap();

    assert!(!result.verified());
    assert_eq!(result.plaintext(), None);
    assert_eq!(b.stats().verification_failures, 1);
    assert_eq!(b.message_count(), 0);
}

#[test]
fn third_party_cannot_pass_verification() {
    let (mut a, _b) = connected(21);
    let (_c, mut d) = connected(42);

    let envelope = a.send_message(b"for b only").unwrap();
    let result = d.receive_message(&envelope).unwrap();

    assert!(!result.verified());
    assert_eq!(d.stats().verification_failures, 1);
}

#[test]
fn truncated_envelope_is_malformed() {
    let (mut a, mut b) = connected(13);
    let mut envelope = a.send_message(b"abc").unwrap();
    envelope.ciphertext = envelope.ciphertext.slice(..4);

    let err = b.receive_message(&envelope).unwrap_err();
    assert!(matches!(err, SessionError::MalformedEnvelope { .. }));
    assert!(!err.is_fatal());
}

#[test]
fn receive_before_remote_key_is_not_ready() {
    let (mut a, _b) = connected(1);
    let envelope = a.send_message(b"early").unwrap();

    let mut fresh = Session::new(TestEnv::seeded(99), 4096);
    fresh.initialize().unwrap();

    assert_eq!(
        fresh.receive_message(&envelope),
        Err(SessionError::NotReady { state: SessionState::Initialized })
    );
}

/// Documents how weak the tag is; this is not a security claim.
///
/// Most single-bit flips change the tag, but the hash is linear enough that
/// anyone holding the sender public component can recompute it for any
/// ciphertext, and nothing here prevents that.
#[test]
fn tag_changes_under_most_single_bit_flips() {
    let key = [0x5Au8; KEY_SIZE];
    let body = b"the quick brown fox jumps over the lazy dog".to_vec();
    let original = cipher::compute_tag(&body, &key);

    let mut changed = 0;
    let mut total = 0;
    for byte in 0..body.len() {
        for bit in 0..8 {
            let mut mutated = body.clone();
            mutated[byte] ^= 1 << bit;
            total += 1;
            if cipher::compute_tag(&mutated, &key) != original {
                changed += 1;
            }
        }
    }

    assert!(changed * 10 >= total * 9, "only {changed}/{total} flips changed the tag");

    // Forgery: recomputing the tag over altered bytes always verifies.
    let mut forged = body;
    forged[0] ^= 0xFF;
    let forged_tag = cipher::compute_tag(&forged, &key);
    assert!(cipher::verify_tag(&forged_tag, &forged, &key));
}

#[test]
fn prop_any_plaintext_round_trips() {
    proptest!(|(
        seed in any::<u64>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..975),
    )| {
        let (mut a, mut b) = connected(seed);

        let envelope = a.send_message(&plaintext).unwrap();
        let result = b.receive_message(&envelope).unwrap();

        prop_assert!(result.verified());
        prop_assert_eq!(result.plaintext(), Some(plaintext.as_slice()));
    });
}
