//! Command-line interface definition.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use rendezvous_core::{BusyInterval, RecurrenceRule};

/// rendezvous - meeting scheduling daemon and client
#[derive(Debug, Parser)]
#[command(name = "rendezvous")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "RENDEZVOUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Path to the daemon socket
    #[arg(long, env = "RENDEZVOUS_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Serve,

    /// Book a meeting; without --at it starts right away
    Book {
        topic: String,

        /// Owner user id
        #[arg(long)]
        owner: String,

        /// Start time (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Length in minutes
        #[arg(long, default_value_t = 30)]
        duration: u32,

        /// none, daily, weekly, biweekly or monthly
        #[arg(long, default_value = "none")]
        repeat: RecurrenceRule,

        /// Last allowed occurrence start (RFC 3339)
        #[arg(long, requires = "at")]
        until: Option<DateTime<Utc>>,

        /// Participant user id (can be repeated)
        #[arg(long = "participant", short = 'p', action = clap::ArgAction::Append)]
        participants: Vec<String>,

        /// User recorded as starting an immediate meeting
        #[arg(long)]
        initiator: Option<String>,
    },

    /// Move or edit a scheduled meeting
    Reschedule {
        id: String,

        #[arg(long)]
        at: Option<DateTime<Utc>>,

        #[arg(long)]
        duration: Option<u32>,

        #[arg(long)]
        topic: Option<String>,
    },

    /// Cancel a scheduled or active meeting
    Cancel {
        id: String,

        /// User cancelling the meeting
        #[arg(long = "by")]
        by: Option<String>,
    },

    /// Enter a meeting, starting it early if it is close enough
    Enter {
        id: String,

        #[arg(long)]
        user: String,
    },

    /// End an active meeting
    End { id: String },

    /// Show a meeting
    Show { id: String },

    /// Find time when every calendar is free
    FreeSlots {
        /// Window start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,

        /// Shortest useful gap in minutes
        #[arg(long, default_value_t = 30)]
        min: u32,

        /// Busy interval as [WHO=]START/END (can be repeated)
        #[arg(long, value_parser = parse_busy, action = clap::ArgAction::Append)]
        busy: Vec<BusyArg>,
    },

    /// Print a user's notifications as they arrive
    Watch {
        #[arg(long)]
        user: String,
    },

    /// Show daemon status
    Status,

    /// Check that the daemon is reachable
    Ping,
}

impl Command {
    /// Returns true for commands that run the daemon rather than talk to it.
    pub fn is_serve(&self) -> bool {
        matches!(self, Self::Serve)
    }
}

/// One `--busy` value: an interval, optionally tagged with whose it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyArg {
    pub who: Option<String>,
    pub interval: BusyInterval,
}

/// Parses `[WHO=]START/END` with RFC 3339 timestamps.
pub fn parse_busy(value: &str) -> Result<BusyArg, String> {
    let (who, range) = match value.split_once('=') {
        Some((who, range)) if !who.trim().is_empty() => (Some(who.trim().to_string()), range),
        Some(_) => return Err(format!("missing name before '=' in {value:?}")),
        None => (None, value),
    };

    let (start, end) = range
        .split_once('/')
        .ok_or_else(|| format!("expected START/END, got {range:?}"))?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    if end < start {
        return Err(format!("interval ends before it starts: {range:?}"));
    }

    Ok(BusyArg {
        who,
        interval: BusyInterval::new(start, end),
    })
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {value:?}: {e}"))
}

/// Groups busy intervals per person. Untagged intervals form one calendar.
pub fn group_busy(args: &[BusyArg]) -> Vec<Vec<BusyInterval>> {
    let mut calendars: Vec<(Option<&str>, Vec<BusyInterval>)> = Vec::new();
    for arg in args {
        let who = arg.who.as_deref();
        match calendars.iter_mut().find(|(w, _)| *w == who) {
            Some((_, intervals)) => intervals.push(arg.interval),
            None => calendars.push((who, vec![arg.interval])),
        }
    }
    calendars.into_iter().map(|(_, intervals)| intervals).collect()
}
