//! Parley chat binary.
//!
//! # Usage
//!
//! ```bash
//! # Wait for a peer on the default port
//! parley serve
//!
//! # Connect to it from another terminal
//! parley connect --peer 127.0.0.1:9001
//!
//! # Keep a cleartext record of the conversation
//! parley serve --audit-log logs/messages.txt
//! ```
//!
//! Type a line and press enter to send it. `exit` ends the chat.

use std::{
    io::{self, BufReader},
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use parley_chat::{ChatConfig, Endpoint, Role, SystemEnv, spawn_line_reader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley two-party chat
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Two-party encrypted chat over TCP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for one peer
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:9001")]
        bind: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Connect to a listening peer
    Connect {
        /// Peer address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        peer: String,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Display name for this side
    #[arg(long)]
    name: Option<String>,

    /// Display name for the peer
    #[arg(long)]
    peer_name: Option<String>,

    /// Session arena size in bytes
    #[arg(long, default_value = "10485760")]
    arena_capacity: usize,

    /// Append a cleartext record of every message to this file
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Close the session after this many seconds without inbound data
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Give up if the peer does not send its key within this many seconds
    #[arg(long, default_value = "10")]
    handshake_timeout_secs: u64,
}

impl CommonArgs {
    fn into_config(self, role: Role) -> ChatConfig {
        let name = self.name.unwrap_or_else(|| role.default_name().to_string());
        let peer_name = self.peer_name.unwrap_or_else(|| role.peer().default_name().to_string());
        ChatConfig {
            arena_capacity: self.arena_capacity,
            audit_log: self.audit_log,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ..ChatConfig::default()
        }
        .with_names(name, peer_name)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Chat text owns stdout; logs go to stderr.
    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let env = SystemEnv::from_entropy()?;
    let endpoint = match cli.command {
        Command::Serve { bind, common } => {
            tracing::info!("Waiting for a peer on {}", bind);
            Endpoint::serve(&bind, common.into_config(Role::Server), env)?
        },
        Command::Connect { peer, common } => {
            tracing::info!("Connecting to {}", peer);
            Endpoint::connect(&peer, common.into_config(Role::Client), env)?
        },
    };

    tracing::info!("Chat ready. Type a message and press enter; 'exit' quits.");

    let lines = spawn_line_reader(BufReader::new(io::stdin()))?;
    let summary = endpoint.run(lines, io::stdout().lock())?;

    tracing::info!(
        messages = summary.stats.message_count,
        rejected = summary.stats.verification_failures,
        "Chat ended"
    );
    Ok(())
}
