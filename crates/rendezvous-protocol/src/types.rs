//! Request and response types for the rendezvous protocol.

use rendezvous_core::{BusyInterval, FreeSlot, Meeting, MeetingUpdate, NewMeeting, TimeWindow};
use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;
use crate::events::NotificationEvent;

/// Message envelope wrapping all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version (always "1" for v1).
    pub protocol_version: String,
    /// Correlates a response with its request.
    pub request_id: String,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current protocol version.
    pub fn new(request_id: impl Into<String>, payload: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id: request_id.into(),
            payload,
        }
    }

    pub fn request(request_id: impl Into<String>, request: T) -> Self {
        Self::new(request_id, request)
    }

    pub fn response(request_id: impl Into<String>, response: T) -> Self {
        Self::new(request_id, response)
    }

    /// Checks if this envelope uses a compatible protocol version.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Requests sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check server liveness.
    Ping,

    /// Get server status.
    Status,

    /// Book a meeting. Without a start time it is active immediately.
    BookMeeting {
        meeting: NewMeeting,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initiator: Option<String>,
    },

    /// Edit a scheduled meeting.
    RescheduleMeeting {
        meeting_id: String,
        update: MeetingUpdate,
    },

    CancelMeeting {
        meeting_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initiator: Option<String>,
    },

    /// Join a meeting, possibly ahead of its start time.
    EnterMeeting { meeting_id: String, user_id: String },

    EndMeeting { meeting_id: String },

    GetMeeting { meeting_id: String },

    /// Find common free time across the given busy calendars.
    FindFreeSlots {
        busy: Vec<Vec<BusyInterval>>,
        window: TimeWindow,
        min_duration_minutes: u32,
    },

    /// Notify the people involved that a meeting report is ready.
    ReportComplete { report: ReportCompletion },

    /// Turn this connection into a stream of the user's notifications.
    Subscribe { user_id: String },

    /// Request server shutdown.
    Shutdown,
}

impl Request {
    /// Wire name of the request type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::BookMeeting { .. } => "book_meeting",
            Self::RescheduleMeeting { .. } => "reschedule_meeting",
            Self::CancelMeeting { .. } => "cancel_meeting",
            Self::EnterMeeting { .. } => "enter_meeting",
            Self::EndMeeting { .. } => "end_meeting",
            Self::GetMeeting { .. } => "get_meeting",
            Self::FindFreeSlots { .. } => "find_free_slots",
            Self::ReportComplete { .. } => "report_complete",
            Self::Subscribe { .. } => "subscribe",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn book(meeting: NewMeeting, initiator: Option<String>) -> Self {
        Self::BookMeeting { meeting, initiator }
    }

    pub fn reschedule(meeting_id: impl Into<String>, update: MeetingUpdate) -> Self {
        Self::RescheduleMeeting {
            meeting_id: meeting_id.into(),
            update,
        }
    }

    pub fn cancel(meeting_id: impl Into<String>, initiator: Option<String>) -> Self {
        Self::CancelMeeting {
            meeting_id: meeting_id.into(),
            initiator,
        }
    }

    pub fn enter(meeting_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::EnterMeeting {
            meeting_id: meeting_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn subscribe(user_id: impl Into<String>) -> Self {
        Self::Subscribe {
            user_id: user_id.into(),
        }
    }
}

/// Input for a report-complete fan-out.
///
/// Recipients come from `participant_ids` when present, otherwise from
/// `attendee_names`, otherwise from `speaker_names`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCompletion {
    pub report_id: String,
    pub meeting_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant_ids: Vec<String>,
    /// Display names from the meeting's attendee list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendee_names: Vec<String>,
    /// Speaker names found in the transcription.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub speaker_names: Vec<String>,
}

/// Outcome of an attempt to enter a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// The meeting was started by this entry.
    Entered { meeting: Meeting },
    /// Too early; nothing changed.
    NotYet { minutes_until_start: i64 },
    /// The meeting was already running.
    AlreadyActive { meeting: Meeting },
}

/// Responses sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to Ping.
    Pong,

    /// Generic success response.
    Ok,

    Status {
        #[serde(flatten)]
        info: StatusInfo,
    },

    Meeting { meeting: Meeting },

    Entry {
        #[serde(flatten)]
        outcome: EntryOutcome,
    },

    FreeSlots { slots: Vec<FreeSlot> },

    /// Result of a fan-out.
    Delivery {
        delivered: Vec<String>,
        dropped: Vec<String>,
    },

    /// One pushed notification on a subscribed connection.
    Event { event: NotificationEvent },

    Error {
        #[serde(flatten)]
        error: ErrorResponse,
    },
}

impl Response {
    pub fn status(info: StatusInfo) -> Self {
        Self::Status { info }
    }

    pub fn meeting(meeting: Meeting) -> Self {
        Self::Meeting { meeting }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorResponse::new(code, message),
        }
    }

    pub fn from_error(error: ErrorResponse) -> Self {
        Self::Error { error }
    }

    /// Returns true unless this is an error response.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    /// Returns the error if this is an error response.
    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// Server status information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub uptime_seconds: u64,
    /// Meetings known to the store.
    pub meetings: usize,
    /// Reminder and start jobs still armed.
    pub pending_jobs: usize,
    /// Users with an open notification stream.
    pub connected_users: usize,
    pub events_delivered: u64,
    pub events_dropped: u64,
}

/// Error codes for protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown or internal error.
    InternalError,

    /// Invalid request format or arguments.
    InvalidRequest,

    /// Request timed out.
    Timeout,

    /// Requested meeting not found.
    NotFound,

    /// The meeting's current status does not allow the operation.
    InvalidTransition,

    /// Server is shutting down.
    ShuttingDown,
}

impl ErrorCode {
    /// Returns a human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InternalError => "An internal error occurred",
            Self::InvalidRequest => "The request was invalid",
            Self::Timeout => "The request timed out",
            Self::NotFound => "Requested resource not found",
            Self::InvalidTransition => "Operation not allowed in the meeting's current state",
            Self::ShuttingDown => "Server is shutting down",
        }
    }
}

/// Error response details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl std::error::Error for ErrorResponse {}
