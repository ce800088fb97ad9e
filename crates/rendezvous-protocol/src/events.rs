//! Notification events pushed to connected users.
//!
//! Events serialize as `{"type": ..., "data": {...}}` with camelCase payload
//! keys. [`NotificationEvent::to_sse`] renders the Server-Sent-Events form.

use chrono::{DateTime, Utc};
use rendezvous_core::Meeting;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolResult;

/// An event emitted by the meeting lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum NotificationEvent {
    /// An immediate meeting was booked and is already active.
    MeetingCreated { meeting: Meeting },

    /// A meeting was scheduled or moved to a new time.
    MeetingScheduled { meeting: Meeting },

    /// A scheduled meeting starts in `minutes_before` minutes.
    MeetingReminder {
        meeting_id: String,
        topic: String,
        scheduled_at: DateTime<Utc>,
        minutes_before: u32,
    },

    /// A meeting became active.
    MeetingStarted { meeting: Meeting },

    MeetingCancelled {
        meeting_id: String,
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cancelled_by: Option<String>,
    },

    /// A meeting report finished processing.
    ReportComplete {
        report_id: String,
        meeting_id: String,
        title: String,
    },
}

impl NotificationEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MeetingCreated { .. } => "meeting_created",
            Self::MeetingScheduled { .. } => "meeting_scheduled",
            Self::MeetingReminder { .. } => "meeting_reminder",
            Self::MeetingStarted { .. } => "meeting_started",
            Self::MeetingCancelled { .. } => "meeting_cancelled",
            Self::ReportComplete { .. } => "report_complete",
        }
    }

    /// Id of the meeting the event concerns.
    pub fn meeting_id(&self) -> &str {
        match self {
            Self::MeetingCreated { meeting }
            | Self::MeetingScheduled { meeting }
            | Self::MeetingStarted { meeting } => &meeting.id,
            Self::MeetingReminder { meeting_id, .. }
            | Self::MeetingCancelled { meeting_id, .. }
            | Self::ReportComplete { meeting_id, .. } => meeting_id,
        }
    }

    /// Builds a reminder for `meeting`.
    ///
    /// Returns `None` if the meeting has no start time.
    pub fn reminder(meeting: &Meeting, minutes_before: u32) -> Option<Self> {
        Some(Self::MeetingReminder {
            meeting_id: meeting.id.clone(),
            topic: meeting.topic.clone(),
            scheduled_at: meeting.scheduled_at?,
            minutes_before,
        })
    }

    pub fn cancelled(meeting: &Meeting, cancelled_by: Option<&str>) -> Self {
        Self::MeetingCancelled {
            meeting_id: meeting.id.clone(),
            topic: meeting.topic.clone(),
            cancelled_by: cancelled_by.map(str::to_string),
        }
    }

    /// Encodes the event as one Server-Sent-Events frame.
    ///
    /// ```text
    /// event: <type>
    /// data: <json payload>
    ///
    /// ```
    pub fn to_sse(&self) -> ProtocolResult<String> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or_default();
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.kind(),
            serde_json::to_string(&data)?
        ))
    }
}
