//! Watch command: prints a user's notifications as Server-Sent-Events frames.

use std::io::Write;

use tracing::info;

use crate::error::ClientResult;
use crate::socket::SocketClient;

/// Streams events for `user_id` until the daemon closes the connection.
pub async fn run(client: &SocketClient, user_id: &str) -> ClientResult<()> {
    let mut events = client.subscribe(user_id).await?;
    info!(user_id, "Subscribed to notifications");

    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await? {
        write!(stdout, "{}", event.to_sse()?)?;
        stdout.flush()?;
    }

    info!("Daemon closed the notification stream");
    Ok(())
}
