//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::recipients::{DEFAULT_RECIPIENT_CHAIN, RecipientSource};

/// Socket server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the Unix socket.
    pub socket_path: PathBuf,

    /// Per-frame read/write timeout for request/response exchanges.
    pub connection_timeout: Duration,

    /// Maximum concurrent connections, subscriptions included.
    pub max_connections: usize,

    /// Whether to remove stale socket on startup.
    pub cleanup_stale_socket: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connection_timeout: Duration::from_secs(30),
            max_connections: 100,
            cleanup_stale_socket: true,
        }
    }
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }
}

/// Timing rules for the meeting lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long before the start time a participant may enter.
    pub early_entry_window: chrono::Duration,

    /// Upper bound on store calls made from job callbacks.
    pub callback_timeout: Duration,

    /// Reminder lead times in minutes.
    pub reminder_offsets: Vec<u32>,

    /// Where report-completion recipients come from, tried in order.
    pub recipient_chain: Vec<RecipientSource>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            early_entry_window: chrono::Duration::minutes(5),
            callback_timeout: Duration::from_secs(10),
            reminder_offsets: vec![30, 5],
            recipient_chain: DEFAULT_RECIPIENT_CHAIN.to_vec(),
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn with_early_entry_window(mut self, window: chrono::Duration) -> Self {
        self.early_entry_window = window;
        self
    }

    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Sets reminder lead times. Duplicates are dropped and the list is kept
    /// longest first.
    #[must_use]
    pub fn with_reminder_offsets(mut self, offsets: impl IntoIterator<Item = u32>) -> Self {
        let mut offsets: Vec<u32> = offsets.into_iter().filter(|m| *m > 0).collect();
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        offsets.dedup();
        self.reminder_offsets = offsets;
        self
    }

    /// Sets the report recipient fallback order. Repeated sources are
    /// dropped; the first occurrence keeps its place.
    #[must_use]
    pub fn with_recipient_chain(mut self, chain: impl IntoIterator<Item = RecipientSource>) -> Self {
        let mut sources = Vec::new();
        for source in chain {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        self.recipient_chain = sources;
        self
    }
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/rendezvous.sock` if available,
/// otherwise falls back to `/tmp/rendezvous-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("rendezvous.sock")
    } else {
        #[cfg(unix)]
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/rendezvous-{uid}.sock"))
    }
}
