//! Reader and writer loops.
//!
//! Each endpoint runs two workers over one duplex connection:
//!
//! ```text
//!  input lines ──> run_writer ──> Session::send_message ──> [len][envelope] ──> stream
//!  stream ──> run_reader ──> FrameDecoder ──> Session::receive_message ──> ChatEvent
//! ```
//!
//! The session sits behind a mutex held for exactly one session call. Both
//! loops poll the shared [`Shutdown`] flag every iteration and trigger it
//! when they exit, so either side stopping winds the other down.

use std::{
    fmt,
    io::{self, BufRead, Read, Write},
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
};

use parking_lot::Mutex;
use parley_core::{AuditRecord, Direction, Environment, Session};
use parley_proto::{Envelope, FrameDecoder, FrameEvent, length_prefix};

use crate::{
    audit::AuditLog,
    config::ChatConfig,
    error::ChatError,
    shutdown::Shutdown,
    transport::{Retry, is_transient},
};

/// Session shared between the reader and writer.
pub type SharedSession<E> = Arc<Mutex<Session<E>>>;

/// Why the conversation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the stream.
    PeerClosed,
    /// No inbound bytes within the idle timeout.
    IdleTimeout,
    /// The connection failed.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer disconnected"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Error(reason) => write!(f, "connection error: {reason}"),
        }
    }
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A verified message from the peer.
    Message {
        /// Peer display name.
        from: String,
        /// Decrypted text.
        text: String,
    },
    /// An envelope whose tag did not verify.
    Rejected {
        /// Peer display name.
        from: String,
    },
    /// The reader stopped.
    Closed {
        /// Why it stopped.
        reason: CloseReason,
    },
}

/// Everything a worker needs besides its half of the stream.
pub struct WorkerContext<E: Environment> {
    /// The endpoint session.
    pub session: SharedSession<E>,
    /// Environment for time, delays and randomness.
    pub env: E,
    /// Flag shared by both workers.
    pub shutdown: Shutdown,
    /// Endpoint configuration.
    pub config: Arc<ChatConfig>,
    /// Cleartext audit log, when enabled.
    pub audit: Option<AuditLog>,
}

impl<E: Environment> Clone for WorkerContext<E> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            env: self.env.clone(),
            shutdown: self.shutdown.clone(),
            config: Arc::clone(&self.config),
            audit: self.audit.clone(),
        }
    }
}

impl<E: Environment> WorkerContext<E> {
    fn retry(&self) -> Retry<E> {
        Retry::new(self.env.clone(), self.config.retry_delay, self.shutdown.clone())
    }

    fn audit(&self, direction: Direction, plaintext: &[u8], envelope: &Envelope) {
        let Some(log) = &self.audit else {
            return;
        };

        let config = &self.config;
        let record =
            AuditRecord::new(direction, &*config.name, &*config.peer_name, plaintext, envelope);
        if let Err(e) = log.append(&record) {
            tracing::warn!(error = %e, "failed to write audit record");
        }
    }
}

/// Forward lines from `input` over a channel.
///
/// Invalid UTF-8 is replaced with U+FFFD rather than ending the input. The
/// thread is detached: it may stay blocked on input after the chat ends. The
/// channel closes when `input` reaches EOF or fails.
pub fn spawn_line_reader<I>(mut input: I) -> Result<Receiver<String>, ChatError>
where
    I: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new().name("parley-input".to_string()).spawn(move || {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match input.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read input");
                    break;
                },
            }

            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf);
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.to_string(),
                Err(_) => {
                    tracing::warn!(len = raw.len(), "input line is not valid UTF-8, replacing");
                    String::from_utf8_lossy(raw).into_owned()
                },
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

/// Read frames from `reader` until the peer closes, an I/O error occurs, the
/// idle timeout passes, or shutdown is triggered.
///
/// Triggers shutdown on exit.
pub fn run_reader<R: Read, E: Environment>(
    mut reader: R,
    ctx: &WorkerContext<E>,
    events: &Sender<ChatEvent>,
) -> Result<(), ChatError> {
    let result = read_loop(&mut reader, ctx, events);
    ctx.shutdown.trigger();

    let reason = match &result {
        Ok(reason) => reason.clone(),
        Err(e) => Some(CloseReason::Error(e.to_string())),
    };
    if let Some(reason) = reason {
        let _ = events.send(ChatEvent::Closed { reason });
    }

    tracing::debug!("reader stopped");
    result.map(|_| ())
}

fn read_loop<R: Read, E: Environment>(
    reader: &mut R,
    ctx: &WorkerContext<E>,
    events: &Sender<ChatEvent>,
) -> Result<Option<CloseReason>, ChatError> {
    let retry = ctx.retry();
    let mut decoder = FrameDecoder::new(ctx.config.receive_capacity);
    let mut buf = vec![0u8; decoder.max_payload().max(parley_proto::LENGTH_PREFIX_SIZE)];
    let mut last_activity = ctx.env.now();

    while !ctx.shutdown.is_triggered() {
        let want = decoder.remaining();
        match reader.read(&mut buf[..want]) {
            Ok(0) => {
                tracing::info!("peer closed the connection");
                return Ok(Some(CloseReason::PeerClosed));
            },
            Ok(n) => {
                last_activity = ctx.env.now();
                let (_, event) = decoder.feed(&buf[..n]);
                if let Some(event) = event {
                    handle_frame(event, ctx, events)?;
                }
            },
            Err(e) if is_transient(&e) => {
                if let Some(idle) = ctx.config.idle_timeout {
                    if ctx.env.now().duration_since(last_activity) >= idle {
                        tracing::info!(?idle, "idle timeout, closing session");
                        return Ok(Some(CloseReason::IdleTimeout));
                    }
                }
                match retry.backoff(&e) {
                    Ok(()) => {},
                    Err(ChatError::Shutdown) => break,
                    Err(other) => return Err(other),
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "read failed");
                return Err(e.into());
            },
        }
    }

    Ok(None)
}

fn handle_frame<E: Environment>(
    event: FrameEvent,
    ctx: &WorkerContext<E>,
    events: &Sender<ChatEvent>,
) -> Result<(), ChatError> {
    let payload = match event {
        FrameEvent::Frame(payload) => payload,
        FrameEvent::Empty => {
            tracing::debug!("empty frame");
            return Ok(());
        },
        FrameEvent::Oversized { length } => {
            tracing::warn!(
                length,
                capacity = ctx.config.receive_capacity,
                "invalid frame length, resynchronizing"
            );
            return Ok(());
        },
    };

    let envelope = match Envelope::decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "malformed envelope, skipping");
            return Ok(());
        },
    };

    let result = ctx.session.lock().receive_message(&envelope);
    match result {
        Ok(result) => match result.into_plaintext() {
            Some(plaintext) => {
                ctx.audit(Direction::Received, &plaintext, &envelope);
                let text = String::from_utf8_lossy(&plaintext).into_owned();
                let from = ctx.config.peer_name.clone();
                let _ = events.send(ChatEvent::Message { from, text });
            },
            None => {
                let _ = events.send(ChatEvent::Rejected { from: ctx.config.peer_name.clone() });
            },
        },
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => tracing::warn!(error = %e, "dropping message"),
    }

    Ok(())
}

/// Encrypt and send each line from `lines` until the exit sentinel, the end
/// of input, or shutdown.
///
/// Empty lines are skipped. Lines too long for the peer receive buffer are
/// dropped with a warning. Triggers shutdown on exit.
pub fn run_writer<W: Write, E: Environment>(
    mut writer: W,
    lines: &Receiver<String>,
    ctx: &WorkerContext<E>,
) -> Result<(), ChatError> {
    let result = write_loop(&mut writer, lines, ctx);
    ctx.shutdown.trigger();
    tracing::debug!("writer stopped");

    match result {
        Err(ChatError::Shutdown) => Ok(()),
        other => other,
    }
}

fn write_loop<W: Write, E: Environment>(
    writer: &mut W,
    lines: &Receiver<String>,
    ctx: &WorkerContext<E>,
) -> Result<(), ChatError> {
    let retry = ctx.retry();
    let max_len = ctx.config.max_message_len();

    while !ctx.shutdown.is_triggered() {
        let line = match lines.recv_timeout(ctx.config.poll_interval) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("input closed");
                return Ok(());
            },
        };

        let line = line.trim_end_matches(['\r', '\n']);
        if line == ctx.config.exit_sentinel {
            tracing::info!("exit requested");
            return Ok(());
        }
        if line.is_empty() {
            continue;
        }
        if line.len() > max_len {
            tracing::warn!(len = line.len(), max = max_len, "message too long, not sent");
            continue;
        }

        let sent = ctx.session.lock().send_message(line.as_bytes());
        let envelope = match sent {
            Ok(envelope) => envelope,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "message not sent");
                continue;
            },
        };

        let payload = envelope.to_bytes()?;
        retry.write_all(writer, &length_prefix(payload.len())?)?;
        retry.write_all(writer, &payload)?;

        ctx.audit(Direction::Sent, line.as_bytes(), &envelope);
        tracing::debug!(len = line.len(), frame = payload.len(), "message sent");
    }

    Ok(())
}

/// Drain `events` into `output` until every sender is gone.
pub fn render_events<O: Write>(events: &Receiver<ChatEvent>, output: &mut O) -> io::Result<()> {
    for event in events {
        match event {
            ChatEvent::Message { from, text } => writeln!(output, "[{from}]: {text}")?,
            ChatEvent::Rejected { from } => {
                writeln!(output, "[{from}]: message rejected (tag mismatch)")?;
            },
            ChatEvent::Closed { reason } => writeln!(output, "*** {reason} ***")?,
        }
        output.flush()?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use bytes::BytesMut;
    use parley_proto::encode_frame;

    use super::*;
    use crate::system_env::SystemEnv;

    /// Reader that replays scripted results, then reports close.
    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.0.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                },
            }
        }
    }

    fn test_config() -> ChatConfig {
        ChatConfig {
            arena_capacity: 64 * 1024,
            retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(5),
            ..ChatConfig::default()
        }
        .with_names("bob", "alice")
    }

    fn context(seed: u64, config: ChatConfig) -> WorkerContext<SystemEnv> {
        let env = SystemEnv::with_seed(seed);
        let mut session = Session::new(env.clone(), config.arena_capacity);
        session.initialize().unwrap();
        WorkerContext {
            session: Arc::new(Mutex::new(session)),
            env,
            shutdown: Shutdown::new(),
            config: Arc::new(config),
            audit: None,
        }
    }

    /// Sender and receiver contexts with exchanged keys.
    fn pair() -> (WorkerContext<SystemEnv>, WorkerContext<SystemEnv>) {
        let alice = context(1, test_config().with_names("alice", "bob"));
        let bob = context(2, test_config());

        let alice_pk = alice.session.lock().local_public_key().unwrap();
        let bob_pk = bob.session.lock().local_public_key().unwrap();
        alice.session.lock().set_remote_public_key(&bob_pk).unwrap();
        bob.session.lock().set_remote_public_key(&alice_pk).unwrap();

        (alice, bob)
    }

    fn frame_for(ctx: &WorkerContext<SystemEnv>, text: &str) -> Vec<u8> {
        let envelope = ctx.session.lock().send_message(text.as_bytes()).unwrap();
        let mut buf = BytesMut::new();
        encode_frame(&envelope.to_bytes().unwrap(), &mut buf).unwrap();
        buf.to_vec()
    }

    fn read_all(reader: Scripted, ctx: &WorkerContext<SystemEnv>) -> Vec<ChatEvent> {
        let (tx, rx) = mpsc::channel();
        run_reader(reader, ctx, &tx).unwrap();
        drop(tx);
        rx.iter().collect()
    }

    #[test]
    fn reader_decodes_split_frames_with_would_block() {
        let (alice, bob) = pair();
        let mut stream = frame_for(&alice, "hello");
        stream.extend(frame_for(&alice, "world"));

        let mut script = VecDeque::new();
        for chunk in stream.chunks(3) {
            script.push_back(Ok(chunk.to_vec()));
            script.push_back(Err(io::ErrorKind::WouldBlock.into()));
        }

        let events = read_all(Scripted(script), &bob);

        assert_eq!(
            events,
            vec![
                ChatEvent::Message { from: "alice".to_string(), text: "hello".to_string() },
                ChatEvent::Message { from: "alice".to_string(), text: "world".to_string() },
                ChatEvent::Closed { reason: CloseReason::PeerClosed },
            ]
        );
        assert!(bob.shutdown.is_triggered());
        assert_eq!(bob.session.lock().message_count(), 2);
    }

    #[test]
    fn reader_skips_empty_and_oversized_frames() {
        let (alice, bob) = pair();
        let mut stream = Vec::new();
        stream.extend_from_slice(&0u32.to_ne_bytes());
        stream.extend_from_slice(&5000u32.to_ne_bytes());
        stream.extend(frame_for(&alice, "still in sync"));

        let events = read_all(Scripted(VecDeque::from([Ok(stream)])), &bob);

        assert_eq!(events[0], ChatEvent::Message {
            from: "alice".to_string(),
            text: "still in sync".to_string()
        });
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn reader_reports_tampered_message() {
        let (alice, bob) = pair();
        let mut stream = frame_for(&alice, "tamper me");
        let last = stream.len() - 1 - 16;
        stream[last] ^= 0xFF;

        let events = read_all(Scripted(VecDeque::from([Ok(stream)])), &bob);

        assert_eq!(events[0], ChatEvent::Rejected { from: "alice".to_string() });
        assert_eq!(bob.session.lock().stats().verification_failures, 1);
    }

    #[test]
    fn reader_skips_malformed_envelope() {
        let (alice, bob) = pair();
        let mut stream = Vec::new();
        stream.extend_from_slice(&9u32.to_ne_bytes());
        stream.extend_from_slice(b"too short");
        stream.extend(frame_for(&alice, "next"));

        let events = read_all(Scripted(VecDeque::from([Ok(stream)])), &bob);

        assert_eq!(events[0], ChatEvent::Message {
            from: "alice".to_string(),
            text: "next".to_string()
        });
    }

    #[test]
    fn reader_io_error_triggers_shutdown() {
        let (_alice, bob) = pair();
        let (tx, rx) = mpsc::channel();

        let reader = Scripted(VecDeque::from([Err(io::ErrorKind::ConnectionReset.into())]));
        let result = run_reader(reader, &bob, &tx);

        assert!(matches!(result, Err(ChatError::Io(_))));
        assert!(bob.shutdown.is_triggered());
        assert!(matches!(rx.recv().unwrap(), ChatEvent::Closed { reason: CloseReason::Error(_) }));
    }

    #[test]
    fn reader_idle_timeout_closes_session() {
        let mut config = test_config();
        config.idle_timeout = Some(Duration::from_millis(20));
        let bob = context(2, config);

        let script: VecDeque<_> =
            (0..1000).map(|_| Err(io::ErrorKind::TimedOut.into())).collect();
        let events = read_all(Scripted(script), &bob);

        assert_eq!(events, vec![ChatEvent::Closed { reason: CloseReason::IdleTimeout }]);
    }

    #[test]
    fn reader_stops_on_shutdown() {
        let (_alice, bob) = pair();
        bob.shutdown.trigger();

        let events = read_all(Scripted(VecDeque::new()), &bob);
        assert!(events.is_empty());
    }

    #[test]
    fn writer_frames_lines_and_stops_at_sentinel() {
        let (alice, bob) = pair();
        let (tx, rx) = mpsc::channel();
        for line in ["hi bob", "", "exit", "never sent"] {
            tx.send(line.to_string()).unwrap();
        }

        let mut wire = Vec::new();
        run_writer(&mut wire, &rx, &alice).unwrap();

        assert!(alice.shutdown.is_triggered());
        assert_eq!(alice.session.lock().message_count(), 1);

        let events = read_all(Scripted(VecDeque::from([Ok(wire)])), &bob);
        assert_eq!(events[0], ChatEvent::Message {
            from: "alice".to_string(),
            text: "hi bob".to_string()
        });
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn writer_drops_lines_too_long_for_the_peer() {
        let (alice, _bob) = pair();
        let (tx, rx) = mpsc::channel();
        tx.send("x".repeat(976)).unwrap();
        tx.send("x".repeat(975)).unwrap();
        drop(tx);

        let mut wire = Vec::new();
        run_writer(&mut wire, &rx, &alice).unwrap();

        assert_eq!(alice.session.lock().message_count(), 1);
        assert_eq!(wire.len(), 4 + 975 + 48);
    }

    #[test]
    fn writer_stops_when_shutdown_triggers() {
        let (alice, _bob) = pair();
        let (_tx, rx) = mpsc::channel::<String>();
        let shutdown = alice.shutdown.clone();

        let handle = thread::spawn(move || {
            let mut wire = Vec::new();
            run_writer(&mut wire, &rx, &alice)
        });
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();

        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn line_reader_survives_invalid_utf8() {
        let input = io::Cursor::new(b"caf\xe9\nhello\r\nexit\nlast".to_vec());
        let lines: Vec<String> = spawn_line_reader(input).unwrap().iter().collect();

        assert_eq!(lines, vec!["caf\u{FFFD}", "hello\r", "exit", "last"]);
    }

    #[test]
    fn render_formats_events() {
        let (tx, rx) = mpsc::channel();
        tx.send(ChatEvent::Message { from: "alice".to_string(), text: "hey".to_string() }).unwrap();
        tx.send(ChatEvent::Closed { reason: CloseReason::PeerClosed }).unwrap();
        drop(tx);

        let mut out = Vec::new();
        render_events(&rx, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "[alice]: hey\n*** peer disconnected ***\n");
    }
}
