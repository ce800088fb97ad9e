//! Daemon: job scheduler, meeting lifecycle, notification hub.
//!
//! This crate provides the rendezvous daemon:
//! - a one-shot [`JobScheduler`] for reminders and meeting starts
//! - the [`MeetingLifecycle`] state machine, including recurrence chaining
//!   and early entry
//! - the [`NotificationHub`] fanning events out to connected users
//! - Unix socket IPC for clients
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rendezvous_server::{
//!     InMemoryMeetingStore, JobScheduler, LifecycleConfig, MeetingLifecycle, NotificationHub,
//!     RequestHandler, ServerConfig, SignalHandler, SocketServer, StaticUserDirectory,
//!     SystemClock, make_connection_handler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let lifecycle = MeetingLifecycle::new(
//!         Arc::new(InMemoryMeetingStore::new()),
//!         JobScheduler::new(Arc::new(SystemClock)),
//!         NotificationHub::new(),
//!         Arc::new(StaticUserDirectory::new()),
//!         LifecycleConfig::default(),
//!     );
//!     let signals = SignalHandler::new();
//!     let handler = RequestHandler::new(lifecycle, signals.shutdown_handle());
//!
//!     let server = SocketServer::new(ServerConfig::default()).await?;
//!     server
//!         .run_until_shutdown(make_connection_handler(handler), signals.shutdown().wait())
//!         .await?;
//!     Ok(())
//! }
//! ```

mod clock;
mod config;
mod directory;
mod error;
mod handler;
mod hub;
mod jobs;
mod lifecycle;
mod recipients;
mod signals;
mod socket;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LifecycleConfig, ServerConfig, default_socket_path};
pub use directory::{StaticUserDirectory, UserDirectory};
pub use error::{ServerError, ServerResult};
pub use handler::{ConnectionFuture, RequestHandler, make_connection_handler};
pub use hub::{DeliveryReport, HubStats, NotificationHub, Subscription};
pub use jobs::{
    CancelReport, FiringMode, JobCallback, JobFuture, JobId, JobKind, JobScheduler, job,
};
pub use lifecycle::{EarlyEntry, MeetingLifecycle};
pub use recipients::{
    DEFAULT_RECIPIENT_CHAIN, RecipientResolver, RecipientSource, meeting_recipients,
};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket::{Connection, SocketServer};
pub use store::{BoxFuture, InMemoryMeetingStore, MeetingStore};
