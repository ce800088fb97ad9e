//! Subcommand implementations.

pub mod meetings;
pub mod serve;
pub mod watch;
