//! Who gets notified about what.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use rendezvous_core::Meeting;
use rendezvous_protocol::ReportCompletion;

use crate::directory::UserDirectory;

/// Recipients of a meeting event.
///
/// An open meeting (no participant list) notifies nobody; otherwise every
/// participant except the one who triggered the event.
pub fn meeting_recipients(meeting: &Meeting, initiator: Option<&str>) -> Vec<String> {
    meeting
        .participant_ids
        .iter()
        .filter(|id| Some(id.as_str()) != initiator)
        .cloned()
        .collect()
}

/// One step of the report-completion fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientSource {
    /// Ids listed on the report.
    ParticipantIds,
    /// Attendee display names looked up in the directory.
    AttendeeNames,
    /// Transcription speaker names looked up in the directory.
    SpeakerNames,
}

impl fmt::Display for RecipientSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ParticipantIds => "participant_ids",
            Self::AttendeeNames => "attendee_names",
            Self::SpeakerNames => "speaker_names",
        })
    }
}

/// Fallback order used unless configured otherwise.
pub const DEFAULT_RECIPIENT_CHAIN: [RecipientSource; 3] = [
    RecipientSource::ParticipantIds,
    RecipientSource::AttendeeNames,
    RecipientSource::SpeakerNames,
];

/// Resolves report recipients by trying each source in order.
pub struct RecipientResolver {
    directory: Arc<dyn UserDirectory>,
    chain: Vec<RecipientSource>,
}

impl RecipientResolver {
    /// Creates a resolver with the default order: ids, attendees, speakers.
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            chain: DEFAULT_RECIPIENT_CHAIN.to_vec(),
        }
    }

    /// Replaces the fallback order. Set from
    /// [`LifecycleConfig::recipient_chain`](crate::LifecycleConfig::recipient_chain).
    #[must_use]
    pub fn with_chain(mut self, chain: Vec<RecipientSource>) -> Self {
        self.chain = chain;
        self
    }

    /// Returns the user ids from the first source that yields any, without
    /// duplicates and in source order.
    pub async fn resolve(&self, report: &ReportCompletion) -> Vec<String> {
        for source in &self.chain {
            let ids = match source {
                RecipientSource::ParticipantIds => report
                    .participant_ids
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect(),
                RecipientSource::AttendeeNames => self.lookup(&report.attendee_names).await,
                RecipientSource::SpeakerNames => self.lookup(&report.speaker_names).await,
            };
            let ids = dedup(ids);
            if !ids.is_empty() {
                debug!(
                    report_id = %report.report_id,
                    %source,
                    count = ids.len(),
                    "Resolved report recipients"
                );
                return ids;
            }
        }
        debug!(report_id = %report.report_id, "No report recipients found");
        Vec::new()
    }

    async fn lookup(&self, names: &[String]) -> Vec<String> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match self.directory.resolve(name).await {
                Some(id) => ids.push(id),
                None => debug!(name = %name, "Unknown user name"),
            }
        }
        ids
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
