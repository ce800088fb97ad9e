//! Meeting model.
//!
//! This module provides the types the lifecycle operates on:
//! - [`Meeting`]: a persisted meeting, possibly one occurrence of a series
//! - [`MeetingStatus`]: the four lifecycle states
//! - [`RecurrenceRule`]: how a series produces its next occurrence
//! - [`NewMeeting`] and [`MeetingUpdate`]: booking and edit inputs

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a meeting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingStatus {
    /// Waiting for its start time.
    #[default]
    Scheduled,
    /// In progress.
    Active,
    /// Finished normally. Terminal.
    Ended,
    /// Called off before it started. Terminal.
    Cancelled,
}

impl MeetingStatus {
    /// Returns true for `Ended` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Active)
                | (Self::Scheduled, Self::Cancelled)
                | (Self::Active, Self::Ended)
        )
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Active => "ACTIVE",
            Self::Ended => "ENDED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a meeting repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceRule {
    #[default]
    None,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl RecurrenceRule {
    /// Returns true unless the rule is `None`.
    pub fn is_recurring(self) -> bool {
        self != Self::None
    }

    /// Start of the occurrence after one starting at `from`.
    ///
    /// Monthly steps are calendar months, clamped to the last day of shorter
    /// months (Jan 31 becomes Feb 28 or 29).
    pub fn next_occurrence(self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::None => None,
            Self::Daily => from.checked_add_signed(Duration::days(1)),
            Self::Weekly => from.checked_add_signed(Duration::days(7)),
            Self::Biweekly => from.checked_add_signed(Duration::days(14)),
            Self::Monthly => from.checked_add_months(Months::new(1)),
        }
    }
}

/// Error returned when parsing an unknown recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recurrence rule: {0}")]
pub struct ParseRecurrenceError(String);

impl FromStr for RecurrenceRule {
    type Err = ParseRecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ParseRecurrenceError(s.to_string())),
        }
    }
}

/// A meeting as stored by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub topic: String,
    pub status: MeetingStatus,
    /// Absent for meetings that started immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub recurrence_rule: RecurrenceRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    /// Id of the series origin for generated occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_meeting_id: Option<String>,
    /// 0 for the origin, increasing along the series.
    #[serde(default)]
    pub recurrence_index: u32,
    /// Empty means open to everyone.
    #[serde(default)]
    pub participant_ids: BTreeSet<String>,
    pub owner_id: String,
}

impl Meeting {
    /// Builds a meeting from booking input.
    ///
    /// Meetings without a start time are created `Active`.
    pub fn from_new(id: impl Into<String>, new: NewMeeting) -> Self {
        let status = if new.scheduled_at.is_some() {
            MeetingStatus::Scheduled
        } else {
            MeetingStatus::Active
        };
        Self {
            id: id.into(),
            topic: new.topic,
            status,
            scheduled_at: new.scheduled_at,
            duration_minutes: new.duration_minutes,
            recurrence_rule: new.recurrence_rule,
            recurrence_end_date: new.recurrence_end_date,
            parent_meeting_id: None,
            recurrence_index: 0,
            participant_ids: new.participant_ids,
            owner_id: new.owner_id,
        }
    }

    /// Returns true if anyone may join.
    pub fn is_open(&self) -> bool {
        self.participant_ids.is_empty()
    }

    /// Id of the first meeting of the series this one belongs to.
    pub fn series_origin_id(&self) -> &str {
        self.parent_meeting_id.as_deref().unwrap_or(&self.id)
    }

    /// Scheduled end, if the meeting has a start time.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
            .map(|start| start + Duration::minutes(i64::from(self.duration_minutes)))
    }

    /// Start of the next occurrence, honouring the recurrence end date.
    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        let next = self.recurrence_rule.next_occurrence(self.scheduled_at?)?;
        match self.recurrence_end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    /// Builds the next occurrence of the series under a fresh id.
    ///
    /// Returns `None` when the series is over.
    pub fn spawn_occurrence(&self, id: impl Into<String>) -> Option<Self> {
        let scheduled_at = self.next_occurrence()?;
        Some(Self {
            id: id.into(),
            status: MeetingStatus::Scheduled,
            scheduled_at: Some(scheduled_at),
            parent_meeting_id: Some(self.series_origin_id().to_string()),
            recurrence_index: self.recurrence_index + 1,
            ..self.clone()
        })
    }

    /// Applies an edit, returning true if the start time changed.
    pub fn apply(&mut self, update: &MeetingUpdate) -> bool {
        if let Some(ref topic) = update.topic {
            self.topic.clone_from(topic);
        }
        if let Some(minutes) = update.duration_minutes {
            self.duration_minutes = minutes;
        }
        match update.scheduled_at {
            Some(at) if self.scheduled_at != Some(at) => {
                self.scheduled_at = Some(at);
                true
            }
            _ => false,
        }
    }
}

/// Input for booking a meeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeeting {
    pub topic: String,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub recurrence_rule: RecurrenceRule,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participant_ids: BTreeSet<String>,
    pub owner_id: String,
}

impl NewMeeting {
    /// Creates booking input for an immediate meeting.
    pub fn new(topic: impl Into<String>, owner_id: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            topic: topic.into(),
            owner_id: owner_id.into(),
            duration_minutes,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    #[must_use]
    pub fn repeating(mut self, rule: RecurrenceRule, until: Option<DateTime<Utc>>) -> Self {
        self.recurrence_rule = rule;
        self.recurrence_end_date = until;
        self
    }

    #[must_use]
    pub fn with_participants<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participant_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial edit applied by a reschedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingUpdate {
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl MeetingUpdate {
    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.scheduled_at.is_none() && self.duration_minutes.is_none() && self.topic.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn weekly_standup() -> Meeting {
        let new = NewMeeting::new("standup", "owner", 15)
            .at(utc(2025, 3, 3, 9, 0))
            .repeating(RecurrenceRule::Weekly, Some(utc(2025, 3, 17, 9, 0)))
            .with_participants(["alice", "bob"]);
        Meeting::from_new("m1", new)
    }

    #[test]
    fn status_transitions() {
        use MeetingStatus::*;
        assert!(Scheduled.can_transition_to(Active));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Ended));
        assert!(!Active.can_transition_to(Cancelled));
        assert!(!Ended.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Scheduled));
        assert!(Ended.is_terminal() && Cancelled.is_terminal());
        assert!(!Scheduled.is_terminal());
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&MeetingStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        assert_eq!(MeetingStatus::Active.to_string(), "ACTIVE");
    }

    #[test]
    fn recurrence_periods() {
        let start = utc(2025, 3, 3, 9, 0);
        assert_eq!(
            RecurrenceRule::Daily.next_occurrence(start),
            Some(utc(2025, 3, 4, 9, 0))
        );
        assert_eq!(
            RecurrenceRule::Weekly.next_occurrence(start),
            Some(utc(2025, 3, 10, 9, 0))
        );
        assert_eq!(
            RecurrenceRule::Biweekly.next_occurrence(start),
            Some(utc(2025, 3, 17, 9, 0))
        );
        assert_eq!(RecurrenceRule::None.next_occurrence(start), None);
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let jan31 = utc(2025, 1, 31, 10, 0);
        assert_eq!(
            RecurrenceRule::Monthly.next_occurrence(jan31),
            Some(utc(2025, 2, 28, 10, 0))
        );
        let leap = utc(2024, 1, 31, 10, 0);
        assert_eq!(
            RecurrenceRule::Monthly.next_occurrence(leap),
            Some(utc(2024, 2, 29, 10, 0))
        );
    }

    #[test]
    fn recurrence_parses_case_insensitively() {
        assert_eq!("WEEKLY".parse::<RecurrenceRule>(), Ok(RecurrenceRule::Weekly));
        assert_eq!(" biweekly ".parse::<RecurrenceRule>(), Ok(RecurrenceRule::Biweekly));
        assert!("fortnightly".parse::<RecurrenceRule>().is_err());
    }

    #[test]
    fn immediate_meeting_starts_active() {
        let meeting = Meeting::from_new("m0", NewMeeting::new("huddle", "owner", 30));
        assert_eq!(meeting.status, MeetingStatus::Active);
        assert!(meeting.is_open());
        assert!(meeting.next_occurrence().is_none());
    }

    #[test]
    fn spawn_occurrence_links_to_origin() {
        let origin = weekly_standup();
        assert_eq!(origin.status, MeetingStatus::Scheduled);

        let second = origin.spawn_occurrence("m2").unwrap();
        assert_eq!(second.recurrence_index, 1);
        assert_eq!(second.parent_meeting_id.as_deref(), Some("m1"));
        assert_eq!(second.scheduled_at, Some(utc(2025, 3, 10, 9, 0)));
        assert_eq!(second.participant_ids, origin.participant_ids);

        let third = second.spawn_occurrence("m3").unwrap();
        assert_eq!(third.recurrence_index, 2);
        assert_eq!(third.parent_meeting_id.as_deref(), Some("m1"));
        assert_eq!(third.scheduled_at, Some(utc(2025, 3, 17, 9, 0)));

        // 2025-03-24 is past the end date.
        assert!(third.spawn_occurrence("m4").is_none());
    }

    #[test]
    fn apply_reports_time_change() {
        let mut meeting = weekly_standup();
        let same_time = MeetingUpdate {
            scheduled_at: meeting.scheduled_at,
            topic: Some("renamed".into()),
            ..Default::default()
        };
        assert!(!meeting.apply(&same_time));
        assert_eq!(meeting.topic, "renamed");

        let moved = MeetingUpdate {
            scheduled_at: Some(utc(2025, 3, 3, 10, 0)),
            duration_minutes: Some(45),
            ..Default::default()
        };
        assert!(meeting.apply(&moved));
        assert_eq!(meeting.duration_minutes, 45);
        assert_eq!(meeting.ends_at(), Some(utc(2025, 3, 3, 10, 45)));
    }

    #[test]
    fn meeting_serializes_camel_case() {
        let meeting = weekly_standup();
        let value = serde_json::to_value(&meeting).unwrap();
        assert_eq!(value["recurrenceRule"], "WEEKLY");
        assert_eq!(value["durationMinutes"], 15);
        assert_eq!(value["recurrenceIndex"], 0);
        assert!(value.get("parentMeetingId").is_none());

        let back: Meeting = serde_json::from_value(value).unwrap();
        assert_eq!(back, meeting);
    }
}
