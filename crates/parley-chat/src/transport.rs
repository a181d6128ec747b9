//! Blocking TCP transport.
//!
//! Sockets run in blocking mode with a read timeout, so every read returns
//! within the poll interval and a worker can notice shutdown. Timeouts,
//! `WouldBlock` and `Interrupted` are transient: the caller sleeps for the
//! retry delay and tries again, until shutdown or an optional deadline.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use parley_core::Environment;

use crate::{config::ChatConfig, error::ChatError, shutdown::Shutdown};

/// True for errors that mean "try again later".
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// How a blocked read or write waits before retrying.
#[derive(Debug, Clone)]
pub struct Retry<E: Environment> {
    env: E,
    delay: Duration,
    shutdown: Shutdown,
    deadline: Option<Instant>,
}

impl<E: Environment> Retry<E> {
    /// Retry after `delay` until `shutdown` triggers.
    pub fn new(env: E, delay: Duration, shutdown: Shutdown) -> Self {
        Self { env, delay, shutdown, deadline: None }
    }

    /// Stop retrying `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.env.now() + timeout);
        self
    }

    /// Wait out a transient error.
    ///
    /// # Errors
    ///
    /// - `Shutdown` once shutdown is triggered
    /// - `DeadlineExceeded` once the timeout has passed
    pub fn backoff(&self, err: &io::Error) -> Result<(), ChatError> {
        if self.shutdown.is_triggered() {
            return Err(ChatError::Shutdown);
        }
        if self.deadline.is_some_and(|deadline| self.env.now() >= deadline) {
            return Err(ChatError::DeadlineExceeded);
        }
        if err.kind() != io::ErrorKind::Interrupted {
            self.env.sleep(self.delay);
        }
        Ok(())
    }

    /// Write all of `buf`, retrying transient errors.
    pub fn write_all<W: Write>(&self, writer: &mut W, mut buf: &[u8]) -> Result<(), ChatError> {
        while !buf.is_empty() {
            match writer.write(buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if is_transient(&e) => self.backoff(&e)?,
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            match writer.flush() {
                Ok(()) => return Ok(()),
                Err(e) if is_transient(&e) => self.backoff(&e)?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fill `buf` completely, retrying transient errors.
    ///
    /// # Errors
    ///
    /// `Closed` if the peer closes the stream first.
    pub fn read_exact<R: Read>(&self, reader: &mut R, buf: &mut [u8]) -> Result<(), ChatError> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => return Err(ChatError::Closed),
                Ok(n) => filled += n,
                Err(e) if is_transient(&e) => self.backoff(&e)?,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Apply the endpoint socket options.
pub fn configure(stream: &TcpStream, config: &ChatConfig) -> Result<(), ChatError> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.poll_interval))?;
    stream.set_write_timeout(Some(config.write_timeout))?;
    Ok(())
}

/// Bind a listener.
pub fn listen<A: ToSocketAddrs>(addr: A) -> Result<TcpListener, ChatError> {
    let listener = TcpListener::bind(addr)?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}

/// Accept one peer and configure its socket.
pub fn accept(
    listener: &TcpListener,
    config: &ChatConfig,
) -> Result<(TcpStream, SocketAddr), ChatError> {
    let (stream, peer) = listener.accept()?;
    configure(&stream, config)?;
    tracing::info!(%peer, "peer connected");
    Ok((stream, peer))
}

/// Connect to `addr`, retrying refused or unreachable peers.
///
/// Makes `config.connect_attempts` attempts spaced `config.connect_backoff`
/// apart.
pub fn connect<E: Environment>(
    addr: &str,
    config: &ChatConfig,
    env: &E,
) -> Result<TcpStream, ChatError> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                configure(&stream, config)?;
                tracing::info!(addr, attempt, "connected");
                return Ok(stream);
            },
            Err(source) if attempt >= config.connect_attempts => {
                return Err(ChatError::ConnectFailed {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source,
                });
            },
            Err(e) => {
                tracing::warn!(
                    addr,
                    attempt,
                    max = config.connect_attempts,
                    error = %e,
                    "connect failed, retrying"
                );
                env.sleep(config.connect_backoff);
                attempt += 1;
            },
        }
    }
}
