//! Request/response dispatch.
//!
//! Routes decoded requests to the meeting lifecycle and turns the outcome,
//! errors included, into a [`Response`].

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Span, debug, info, warn};

use rendezvous_protocol::{EntryOutcome, Request, Response, StatusInfo};

use crate::error::{ServerError, ServerResult};
use crate::hub::Subscription;
use crate::lifecycle::{EarlyEntry, MeetingLifecycle};
use crate::signals::ShutdownHandle;
use crate::socket::Connection;

/// Handles requests for every connection of the daemon.
#[derive(Clone)]
pub struct RequestHandler {
    lifecycle: Arc<MeetingLifecycle>,
    shutdown: ShutdownHandle,
    started: Instant,
}

impl RequestHandler {
    pub fn new(lifecycle: Arc<MeetingLifecycle>, shutdown: ShutdownHandle) -> Self {
        Self {
            lifecycle,
            shutdown,
            started: Instant::now(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<MeetingLifecycle> {
        &self.lifecycle
    }

    /// Handles a single request and returns the response.
    ///
    /// `subscribe` needs the connection itself and is refused here; see
    /// [`handle_connection`](Self::handle_connection).
    #[tracing::instrument(skip(self, request), fields(request_type = request.kind(), duration_ms))]
    pub async fn handle(&self, request: &Request) -> Response {
        let start = Instant::now();

        let response = if self.shutdown.is_shutdown() && !matches!(request, Request::Ping) {
            Response::from_error(ServerError::Shutdown.to_response())
        } else {
            match self.dispatch(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, "Request failed");
                    Response::from_error(e.to_response())
                }
            }
        };

        let duration = start.elapsed();
        Span::current().record("duration_ms", duration.as_millis());
        debug!(duration_ms = duration.as_millis(), "Request handled");
        response
    }

    async fn dispatch(&self, request: &Request) -> ServerResult<Response> {
        let lifecycle = &self.lifecycle;
        let response = match request {
            Request::Ping => Response::Pong,
            Request::Status => Response::status(self.status_info().await?),
            Request::BookMeeting { meeting, initiator } => {
                let meeting = lifecycle
                    .book(meeting.clone(), initiator.as_deref())
                    .await?;
                Response::meeting(meeting)
            }
            Request::RescheduleMeeting { meeting_id, update } => {
                let meeting = lifecycle
                    .reschedule_meeting(meeting_id, update.clone())
                    .await?;
                Response::meeting(meeting)
            }
            Request::CancelMeeting {
                meeting_id,
                initiator,
            } => {
                let (meeting, _jobs) = lifecycle
                    .cancel_meeting(meeting_id, initiator.as_deref())
                    .await?;
                Response::meeting(meeting)
            }
            Request::EnterMeeting {
                meeting_id,
                user_id,
            } => {
                let entry = lifecycle
                    .attempt_early_entry(meeting_id, user_id, lifecycle.now())
                    .await?;
                Response::Entry {
                    outcome: match entry {
                        EarlyEntry::Entered(meeting) => EntryOutcome::Entered { meeting },
                        EarlyEntry::NotYet {
                            minutes_until_start,
                        } => EntryOutcome::NotYet {
                            minutes_until_start,
                        },
                        EarlyEntry::AlreadyActive(meeting) => {
                            EntryOutcome::AlreadyActive { meeting }
                        }
                    },
                }
            }
            Request::EndMeeting { meeting_id } => {
                Response::meeting(lifecycle.end_meeting(meeting_id).await?)
            }
            Request::GetMeeting { meeting_id } => {
                Response::meeting(lifecycle.get_meeting(meeting_id).await?)
            }
            Request::FindFreeSlots {
                busy,
                window,
                min_duration_minutes,
            } => {
                let min = chrono::Duration::minutes(i64::from(*min_duration_minutes));
                let slots = lifecycle.find_free_slots(busy, window, min);
                debug!(slot_count = slots.len(), "Free slots found");
                Response::FreeSlots { slots }
            }
            Request::ReportComplete { report } => {
                let delivery = lifecycle.report_complete(report).await;
                Response::Delivery {
                    delivered: delivery.delivered,
                    dropped: delivery.dropped,
                }
            }
            Request::Subscribe { .. } => {
                return Err(ServerError::invalid_request(
                    "subscribe is only available on a socket connection",
                ));
            }
            Request::Shutdown => {
                info!("Shutdown requested by client");
                self.shutdown.trigger();
                Response::Ok
            }
        };
        Ok(response)
    }

    async fn status_info(&self) -> ServerResult<StatusInfo> {
        let hub = self.lifecycle.hub().stats().await;
        Ok(StatusInfo {
            uptime_seconds: self.started.elapsed().as_secs(),
            meetings: self.lifecycle.meeting_count().await?,
            pending_jobs: self.lifecycle.scheduler().pending_count().await,
            connected_users: hub.connected,
            events_delivered: hub.delivered,
            events_dropped: hub.dropped,
        })
    }

    /// Serves one connection until the client leaves.
    pub async fn handle_connection(&self, mut conn: Connection) -> ServerResult<()> {
        loop {
            let Some(envelope) = conn.read_request().await? else {
                debug!("Client disconnected");
                return Ok(());
            };

            if let Request::Subscribe { user_id } = &envelope.payload {
                return self
                    .stream_events(conn, &envelope.request_id, user_id)
                    .await;
            }

            let response = self.handle(&envelope.payload).await;
            conn.respond(&envelope.request_id, response).await?;

            if self.shutdown.is_shutdown() {
                return Err(ServerError::Shutdown);
            }
        }
    }

    /// Pushes the user's notifications down the connection.
    ///
    /// The subscription is acknowledged with `ok`, then every event goes out
    /// as an `event` frame tagged with the subscribe request id. The stream
    /// ends when the client hangs up, a newer subscription replaces this one,
    /// or the daemon shuts down.
    async fn stream_events(
        &self,
        mut conn: Connection,
        request_id: &str,
        user_id: &str,
    ) -> ServerResult<()> {
        let hub = self.lifecycle.hub();
        let mut subscription = hub.connect(user_id).await;
        info!(user_id, "Notification stream opened");

        let outcome = self
            .pump_events(&mut conn, &mut subscription, request_id)
            .await;

        hub.release(&subscription).await;
        match &outcome {
            Ok(()) => info!(user_id, "Notification stream closed"),
            Err(e) => warn!(user_id, error = %e, "Notification stream failed"),
        }
        outcome
    }

    async fn pump_events(
        &self,
        conn: &mut Connection,
        subscription: &mut Subscription,
        request_id: &str,
    ) -> ServerResult<()> {
        conn.respond(request_id, Response::Ok).await?;
        let shutdown = self.shutdown.wait().wait();
        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                event = subscription.recv() => event,
                () = conn.closed() => None,
                () = &mut shutdown => None,
            };
            let Some(event) = next else {
                return Ok(());
            };
            conn.respond(request_id, Response::Event { event }).await?;
        }
    }
}

/// Future returned by a connection handler.
pub type ConnectionFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Builds the per-connection callback for
/// [`SocketServer::run`](crate::SocketServer::run).
pub fn make_connection_handler(
    handler: RequestHandler,
) -> impl Fn(Connection) -> ConnectionFuture + Send + Sync + 'static {
    move |conn| {
        let handler = handler.clone();
        Box::pin(async move {
            if let Err(e) = handler.handle_connection(conn).await
                && !matches!(e, ServerError::Shutdown)
            {
                warn!(error = %e, "Connection handler error");
            }
        })
    }
}
