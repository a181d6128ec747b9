//! Chat endpoint: connection setup and worker lifecycle.
//!
//! An endpoint owns one TCP connection and one session. Setup runs on the
//! calling thread: validate the configuration, initialize the session,
//! exchange public components and install the peer key. [`Endpoint::run`]
//! then starts the reader and writer threads and renders what the reader
//! reports until both workers have stopped.

use std::{
    fmt,
    io::Write,
    net::{SocketAddr, TcpStream},
    sync::{
        Arc,
        mpsc::{self, Receiver},
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use parley_core::{ArenaStats, Environment, Session, SessionStats};

use crate::{
    audit::AuditLog,
    config::ChatConfig,
    error::ChatError,
    handshake::{Role, exchange_public_keys},
    shutdown::Shutdown,
    transport::{self, Retry},
    worker::{self, WorkerContext},
};

/// Counters reported when an endpoint stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Session message counters.
    pub stats: SessionStats,
    /// Arena usage at shutdown.
    pub arena: ArenaStats,
}

/// A connected endpoint with an active session.
pub struct Endpoint<E: Environment> {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    role: Role,
    ctx: WorkerContext<E>,
}

impl<E: Environment> Endpoint<E> {
    /// Listen on `addr`, accept one peer and run the handshake.
    pub fn serve(addr: &str, config: ChatConfig, env: E) -> Result<Self, ChatError> {
        config.validate()?;
        let listener = transport::listen(addr)?;
        let (stream, _) = transport::accept(&listener, &config)?;
        Self::establish(stream, Role::Server, config, env)
    }

    /// Connect to `addr` and run the handshake.
    pub fn connect(addr: &str, config: ChatConfig, env: E) -> Result<Self, ChatError> {
        config.validate()?;
        let stream = transport::connect(addr, &config, &env)?;
        Self::establish(stream, Role::Client, config, env)
    }

    /// Set up a session over an already connected stream.
    pub fn establish(
        stream: TcpStream,
        role: Role,
        config: ChatConfig,
        env: E,
    ) -> Result<Self, ChatError> {
        config.validate()?;
        transport::configure(&stream, &config)?;

        let mut session = Session::new(env.clone(), config.arena_capacity);
        session.initialize()?;
        let local_public = session.local_public_key().ok_or_else(|| ChatError::Handshake {
            reason: "session has no local keypair".to_string(),
        })?;

        let shutdown = Shutdown::new();
        let retry = Retry::new(env.clone(), config.retry_delay, shutdown.clone())
            .with_timeout(config.handshake_timeout);
        let mut handshake_stream = &stream;
        let remote_public =
            exchange_public_keys(&mut handshake_stream, role, &local_public, &retry)?;
        session.set_remote_public_key(&remote_public)?;

        let audit = config.audit_log.as_ref().map(|path| AuditLog::open(path)).transpose()?;
        let peer = stream.peer_addr().ok();

        tracing::info!(
            session_id = session.session_id(),
            ?role,
            peer = ?peer,
            name = %config.name,
            "session established"
        );

        let ctx = WorkerContext {
            session: Arc::new(Mutex::new(session)),
            env,
            shutdown,
            config: Arc::new(config),
            audit,
        };
        Ok(Self { stream, peer, role, ctx })
    }

    /// Which side this endpoint is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer socket address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Shutdown flag shared with the workers.
    pub fn shutdown(&self) -> &Shutdown {
        &self.ctx.shutdown
    }

    /// Run the conversation.
    ///
    /// Sends each line from `lines` and writes peer messages to `output`.
    /// Returns once the exit sentinel is read, input ends, the peer leaves,
    /// or either worker fails.
    pub fn run<O: Write>(
        self,
        lines: Receiver<String>,
        mut output: O,
    ) -> Result<RunSummary, ChatError> {
        let Self { stream, ctx, .. } = self;
        let (events_tx, events_rx) = mpsc::channel();

        let reader_stream = stream.try_clone()?;
        let reader_ctx = ctx.clone();
        let reader = thread::Builder::new().name("parley-reader".to_string()).spawn(move || {
            worker::run_reader(reader_stream, &reader_ctx, &events_tx)
        })?;

        let writer_ctx = ctx.clone();
        let writer = thread::Builder::new()
            .name("parley-writer".to_string())
            .spawn(move || worker::run_writer(stream, &lines, &writer_ctx))?;

        // Ends when the reader drops its sender.
        if let Err(e) = worker::render_events(&events_rx, &mut output) {
            tracing::warn!(error = %e, "failed to write output");
            ctx.shutdown.trigger();
        }

        let reader_result = join(reader, "reader");
        let writer_result = join(writer, "writer");

        let summary = {
            let session = ctx.session.lock();
            RunSummary { stats: session.stats(), arena: session.arena().stats() }
        };
        tracing::info!(
            messages = summary.stats.message_count,
            sent = summary.stats.messages_encrypted,
            received = summary.stats.messages_decrypted,
            rejected = summary.stats.verification_failures,
            arena_used = summary.arena.used,
            arena_high_water = summary.arena.high_water,
            "session closed"
        );

        for result in [reader_result, writer_result] {
            if let Err(e) = result {
                if !e.is_orderly() {
                    return Err(e);
                }
            }
        }
        Ok(summary)
    }
}

impl<E: Environment> fmt::Debug for Endpoint<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("name", &self.ctx.config.name)
            .finish_non_exhaustive()
    }
}

fn join(handle: JoinHandle<Result<(), ChatError>>, name: &'static str) -> Result<(), ChatError> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(worker = name, "worker thread panicked");
            Err(ChatError::WorkerPanicked { name })
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{net::TcpListener, time::Duration};

    use super::*;
    use crate::system_env::SystemEnv;

    fn config(name: &str, peer: &str) -> ChatConfig {
        ChatConfig {
            arena_capacity: 64 * 1024,
            retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            ..ChatConfig::default()
        }
        .with_names(name, peer)
    }

    fn connected_pair() -> (Endpoint<SystemEnv>, Endpoint<SystemEnv>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            Endpoint::establish(
                stream,
                Role::Client,
                config("Client", "Server"),
                SystemEnv::with_seed(2),
            )
            .unwrap()
        });

        let (stream, _) = listener.accept().unwrap();
        let server = Endpoint::establish(
            stream,
            Role::Server,
            config("Server", "Client"),
            SystemEnv::with_seed(1),
        )
        .unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn establish_installs_peer_key() {
        let (server, client) = connected_pair();

        let server_session = server.ctx.session.lock();
        let client_session = client.ctx.session.lock();
        assert_eq!(
            server_session.remote_public_key().unwrap(),
            client_session.local_public_key().unwrap()
        );
        assert_eq!(
            client_session.remote_public_key().unwrap(),
            server_session.local_public_key().unwrap()
        );
        assert_eq!(server.role(), Role::Server);
        assert!(client.peer_addr().is_some());
    }

    #[test]
    fn invalid_config_is_rejected_before_io() {
        let bad = ChatConfig { arena_capacity: 8, ..ChatConfig::default() };
        let err = Endpoint::connect("127.0.0.1:1", bad, SystemEnv::with_seed(0)).unwrap_err();
        assert!(matches!(err, ChatError::Config { .. }));
    }

    #[test]
    fn silent_peer_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(1));
            drop(stream);
        });

        let config = ChatConfig {
            handshake_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            ..config("Client", "Server")
        };
        let stream = TcpStream::connect(addr).unwrap();
        let started = std::time::Instant::now();
        let err = Endpoint::establish(stream, Role::Client, config, SystemEnv::with_seed(3))
            .unwrap_err();

        assert!(matches!(err, ChatError::Handshake { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        silent.join().unwrap();
    }

    #[test]
    fn peer_leaving_ends_run() {
        let (server, client) = connected_pair();
        drop(client);

        let (_tx, rx) = mpsc::channel();
        let mut output = Vec::new();
        let summary = server.run(rx, &mut output).unwrap();

        assert_eq!(summary.stats.message_count, 0);
        assert!(String::from_utf8(output).unwrap().contains("peer disconnected"));
    }
}
