//! Parley chat endpoint.
//!
//! Runs one side of a two-party encrypted chat over a single TCP connection:
//! - Blocking std sockets with read timeouts
//! - One reader and one writer thread per endpoint
//! - System time and OS-seeded RNG
//!
//! ## Architecture
//!
//! ```text
//! parley-chat
//!   ├─ Endpoint     (connection setup, worker lifecycle)
//!   ├─ handshake    (public component exchange)
//!   ├─ worker       (reader/writer loops, shared session)
//!   ├─ transport    (TCP setup, would-block retry)
//!   ├─ AuditLog     (opt-in cleartext log)
//!   └─ SystemEnv    (production Environment impl)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod shutdown;
pub mod system_env;
pub mod transport;
pub mod worker;

pub use audit::AuditLog;
pub use config::{ChatConfig, DEFAULT_PORT};
pub use endpoint::{Endpoint, RunSummary};
pub use error::ChatError;
pub use handshake::Role;
pub use shutdown::Shutdown;
pub use system_env::SystemEnv;
pub use worker::{ChatEvent, CloseReason, spawn_line_reader};
