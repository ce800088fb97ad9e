//! One-shot commands: each maps to a single request/response exchange.

use rendezvous_core::{MeetingUpdate, NewMeeting, TimeWindow};
use rendezvous_protocol::{EntryOutcome, Request, Response};

use crate::cli::{Command, group_busy};
use crate::error::{ClientError, ClientResult};
use crate::socket::SocketClient;

/// Translates a parsed command into its daemon request.
pub fn build_request(command: &Command) -> ClientResult<Request> {
    let request = match command {
        Command::Book {
            topic,
            owner,
            at,
            duration,
            repeat,
            until,
            participants,
            initiator,
        } => {
            let mut meeting = NewMeeting::new(topic, owner, *duration)
                .repeating(*repeat, *until)
                .with_participants(participants.iter().cloned());
            if let Some(at) = at {
                meeting = meeting.at(*at);
            }
            Request::book(meeting, initiator.clone())
        }
        Command::Reschedule {
            id,
            at,
            duration,
            topic,
        } => {
            let update = MeetingUpdate {
                scheduled_at: *at,
                duration_minutes: *duration,
                topic: topic.clone(),
            };
            if update.is_empty() {
                return Err(ClientError::InvalidArgument(
                    "nothing to change; pass --at, --duration or --topic".into(),
                ));
            }
            Request::reschedule(id, update)
        }
        Command::Cancel { id, by } => Request::cancel(id, by.clone()),
        Command::Enter { id, user } => Request::enter(id, user),
        Command::End { id } => Request::EndMeeting {
            meeting_id: id.clone(),
        },
        Command::Show { id } => Request::GetMeeting {
            meeting_id: id.clone(),
        },
        Command::FreeSlots {
            from,
            to,
            min,
            busy,
        } => {
            let window = TimeWindow::new(*from, *to).ok_or_else(|| {
                ClientError::InvalidArgument(format!("--from {from} is after --to {to}"))
            })?;
            Request::FindFreeSlots {
                busy: group_busy(busy),
                window,
                min_duration_minutes: *min,
            }
        }
        Command::Status => Request::Status,
        Command::Ping => Request::Ping,
        Command::Serve | Command::Watch { .. } => {
            return Err(ClientError::InvalidArgument(
                "command does not map to a single request".into(),
            ));
        }
    };
    Ok(request)
}

/// Sends the request for `command` and prints the answer.
pub async fn execute(client: &SocketClient, command: &Command) -> ClientResult<()> {
    let request = build_request(command)?;
    let response = client.send(request).await?;
    println!("{}", render(response)?);
    Ok(())
}

/// Renders a successful response for the terminal. Error responses become
/// [`ClientError::Remote`].
fn render(response: Response) -> ClientResult<String> {
    let value = match response {
        Response::Error { error } => return Err(ClientError::Remote(error)),
        Response::Pong => return Ok("pong".into()),
        Response::Ok => return Ok("ok".into()),
        Response::Entry {
            outcome: EntryOutcome::NotYet {
                minutes_until_start,
            },
        } => {
            return Ok(format!(
                "too early: the meeting starts in {minutes_until_start} minute(s)"
            ));
        }
        Response::Status { info } => serde_json::to_value(info)?,
        Response::Meeting { meeting }
        | Response::Entry {
            outcome: EntryOutcome::Entered { meeting } | EntryOutcome::AlreadyActive { meeting },
        } => serde_json::to_value(meeting)?,
        Response::FreeSlots { slots } => serde_json::to_value(slots)?,
        other @ (Response::Delivery { .. } | Response::Event { .. }) => {
            serde_json::to_value(other)?
        }
    };
    Ok(serde_json::to_string_pretty(&value)?)
}
