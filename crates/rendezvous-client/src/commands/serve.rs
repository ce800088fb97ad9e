//! Serve command: runs the daemon in the foreground.
//!
//! Wires the in-memory store, the timer-driven job scheduler, the
//! notification hub and the configured user directory into a
//! [`MeetingLifecycle`], then serves it on the Unix socket until SIGTERM,
//! SIGINT or a `shutdown` request.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use rendezvous_server::{
    InMemoryMeetingStore, JobScheduler, MeetingLifecycle, NotificationHub, RequestHandler,
    SignalHandler, SocketServer, SystemClock, make_connection_handler,
};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Runs the daemon until shutdown.
pub async fn run(config: &ClientConfig, socket_path: PathBuf) -> ClientResult<()> {
    let lifecycle_config = config.lifecycle_config();
    info!(
        early_entry_minutes = lifecycle_config.early_entry_window.num_minutes(),
        reminder_offsets = ?lifecycle_config.reminder_offsets,
        directory_entries = config.directory.len(),
        "Starting daemon"
    );

    let scheduler = JobScheduler::new(Arc::new(SystemClock));
    let lifecycle = MeetingLifecycle::new(
        Arc::new(InMemoryMeetingStore::new()),
        scheduler.clone(),
        NotificationHub::new(),
        Arc::new(config.user_directory()),
        lifecycle_config,
    );

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let server = SocketServer::new(config.server_config(socket_path)).await?;
    let handler = RequestHandler::new(lifecycle, signal_handler.shutdown_handle());

    server
        .run_until_shutdown(
            make_connection_handler(handler),
            signal_handler.shutdown().wait(),
        )
        .await?;

    info!("Shutting down...");
    let dropped = scheduler.clear().await;
    info!(dropped_jobs = dropped, "Daemon stopped");
    Ok(())
}
