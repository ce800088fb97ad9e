//! CLI, configuration and socket client.
//!
//! This crate provides the `rendezvous` binary: `serve` runs the daemon in
//! the foreground, every other subcommand talks to a running daemon over its
//! Unix socket.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod socket;

pub use cli::Cli;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use socket::{EventStream, SocketClient};
