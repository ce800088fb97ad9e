//! Per-user notification fan-out.
//!
//! Each connected user owns at most one channel. Delivery is best-effort and
//! at-most-once: events for users without a live channel are dropped, never
//! queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use rendezvous_protocol::NotificationEvent;

/// A user's live notification stream.
#[derive(Debug)]
pub struct Subscription {
    /// Distinguishes this stream from later ones for the same user.
    pub id: u64,
    pub user_id: String,
    receiver: mpsc::UnboundedReceiver<NotificationEvent>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// Returns `None` once the hub replaced or dropped this stream.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<NotificationEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Outcome of sending one event to several users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub dropped: Vec<String>,
}

/// Counters exposed in the server status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connected: usize,
    pub delivered: u64,
    pub dropped: u64,
}

struct Channel {
    id: u64,
    sender: mpsc::UnboundedSender<NotificationEvent>,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<String, Channel>,
    next_id: u64,
}

/// Routes notification events to connected users.
#[derive(Clone, Default)]
pub struct NotificationHub {
    state: Arc<RwLock<HubState>>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel for `user_id`, closing any previous one.
    pub async fn connect(&self, user_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        if state
            .channels
            .insert(user_id.to_string(), Channel { id, sender })
            .is_some()
        {
            debug!(user_id, "Replaced existing notification channel");
        } else {
            debug!(user_id, "User connected");
        }
        Subscription {
            id,
            user_id: user_id.to_string(),
            receiver,
        }
    }

    /// Closes the user's channel. Returns false if none was open.
    pub async fn disconnect(&self, user_id: &str) -> bool {
        let removed = self.state.write().await.channels.remove(user_id).is_some();
        if removed {
            debug!(user_id, "User disconnected");
        }
        removed
    }

    /// Closes the user's channel only if it is still `subscription`.
    ///
    /// A stream that was already replaced leaves the newer one untouched.
    pub async fn release(&self, subscription: &Subscription) -> bool {
        let mut state = self.state.write().await;
        match state.channels.get(&subscription.user_id) {
            Some(channel) if channel.id == subscription.id => {
                state.channels.remove(&subscription.user_id);
                debug!(user_id = %subscription.user_id, "Subscription released");
                true
            }
            _ => false,
        }
    }

    /// Sends `event` to one user. Returns whether it was handed over.
    ///
    /// A channel whose receiver is gone is pruned here.
    pub async fn publish(&self, user_id: &str, event: NotificationEvent) -> bool {
        let outcome = {
            let state = self.state.read().await;
            state
                .channels
                .get(user_id)
                .map(|channel| (channel.id, channel.sender.send(event).is_ok()))
        };

        match outcome {
            Some((_, true)) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(user_id, "Event delivered");
                true
            }
            Some((id, false)) => {
                let mut state = self.state.write().await;
                if state.channels.get(user_id).is_some_and(|c| c.id == id) {
                    state.channels.remove(user_id);
                    debug!(user_id, "Pruned closed notification channel");
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(user_id, "User offline, event dropped");
                false
            }
        }
    }

    /// Publishes `event` to every recipient.
    pub async fn fan_out<I, S>(&self, recipients: I, event: &NotificationEvent) -> DeliveryReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = DeliveryReport::default();
        for recipient in recipients {
            let recipient = recipient.as_ref();
            if self.publish(recipient, event.clone()).await {
                report.delivered.push(recipient.to_string());
            } else {
                report.dropped.push(recipient.to_string());
            }
        }
        debug!(
            event = event.kind(),
            meeting_id = event.meeting_id(),
            delivered = report.delivered.len(),
            dropped = report.dropped.len(),
            "Event fanned out"
        );
        report
    }

    /// Returns true if the user has a live channel.
    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(user_id)
            .is_some_and(|c| !c.sender.is_closed())
    }

    pub async fn stats(&self) -> HubStats {
        let connected = self
            .state
            .read()
            .await
            .channels
            .values()
            .filter(|c| !c.sender.is_closed())
            .count();
        HubStats {
            connected,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
