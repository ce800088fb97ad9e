//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/rendezvous/config.toml` by default:
//!
//! ```toml
//! [server]
//! socket_path = "/run/user/1000/rendezvous.sock"
//! timeout = 5
//!
//! [lifecycle]
//! early_entry_minutes = 5
//! callback_timeout_secs = 10
//! reminder_offsets = [30, 5]
//!
//! [directory]
//! "Alice Martin" = "u-alice"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rendezvous_server::{LifecycleConfig, ServerConfig, StaticUserDirectory, default_socket_path};

use crate::error::{ClientError, ClientResult};

/// Configuration for the rendezvous client and daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    pub server: ServerSettings,

    pub lifecycle: LifecycleSettings,

    /// Display name to user id, used to address report notifications.
    pub directory: BTreeMap<String, String>,
}

/// Socket settings shared by the daemon and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub socket_path: Option<PathBuf>,

    /// Connection timeout in seconds.
    pub timeout: u64,

    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            timeout: 5,
            max_connections: 100,
        }
    }
}

/// Meeting timing rules applied by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub early_entry_minutes: u32,
    pub callback_timeout_secs: u64,
    /// Minutes before the start at which reminders go out.
    pub reminder_offsets: Vec<u32>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            early_entry_minutes: 5,
            callback_timeout_secs: 10,
            reminder_offsets: vec![30, 5],
        }
    }
}

impl ClientConfig {
    /// Loads the default file, or defaults if there is none.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rendezvous")
    }

    /// Socket path: the explicit override, then the file, then the default.
    pub fn socket_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.server.socket_path.clone())
            .unwrap_or_else(default_socket_path)
    }

    pub fn timeout(&self, cli_override: Option<u64>) -> Duration {
        Duration::from_secs(cli_override.unwrap_or(self.server.timeout))
    }

    pub fn server_config(&self, socket_path: PathBuf) -> ServerConfig {
        ServerConfig::new(socket_path).with_max_connections(self.server.max_connections)
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let settings = &self.lifecycle;
        LifecycleConfig::default()
            .with_early_entry_window(chrono::Duration::minutes(i64::from(
                settings.early_entry_minutes,
            )))
            .with_callback_timeout(Duration::from_secs(settings.callback_timeout_secs))
            .with_reminder_offsets(settings.reminder_offsets.iter().copied())
    }

    pub fn user_directory(&self) -> StaticUserDirectory {
        self.directory.iter().collect()
    }
}
