//! Meeting persistence collaborator.
//!
//! The lifecycle only talks to storage through [`MeetingStore`]. The daemon
//! ships [`InMemoryMeetingStore`]; a database-backed store plugs in the same
//! way.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use rendezvous_core::{Meeting, MeetingStatus};

use crate::error::{ServerError, ServerResult};

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage for meetings.
pub trait MeetingStore: Send + Sync {
    /// Stores a new meeting. Fails if the id is taken.
    fn insert(&self, meeting: Meeting) -> BoxFuture<'_, ServerResult<()>>;

    fn get(&self, id: &str) -> BoxFuture<'_, ServerResult<Option<Meeting>>>;

    /// Replaces a stored meeting.
    fn update(&self, meeting: Meeting) -> BoxFuture<'_, ServerResult<()>>;

    /// Writes a new status and returns the updated meeting.
    fn set_status(&self, id: &str, status: MeetingStatus) -> BoxFuture<'_, ServerResult<Meeting>>;

    /// Removes a meeting. Returns false if it did not exist.
    fn delete(&self, id: &str) -> BoxFuture<'_, ServerResult<bool>>;

    fn list(&self) -> BoxFuture<'_, ServerResult<Vec<Meeting>>>;
}

/// Process-local store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryMeetingStore {
    meetings: RwLock<BTreeMap<String, Meeting>>,
}

impl InMemoryMeetingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.meetings.read().await.len()
    }
}

impl MeetingStore for InMemoryMeetingStore {
    fn insert(&self, meeting: Meeting) -> BoxFuture<'_, ServerResult<()>> {
        Box::pin(async move {
            let mut meetings = self.meetings.write().await;
            if meetings.contains_key(&meeting.id) {
                return Err(ServerError::store(format!(
                    "meeting {} already exists",
                    meeting.id
                )));
            }
            meetings.insert(meeting.id.clone(), meeting);
            Ok(())
        })
    }

    fn get(&self, id: &str) -> BoxFuture<'_, ServerResult<Option<Meeting>>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.meetings.read().await.get(&id).cloned()) })
    }

    fn update(&self, meeting: Meeting) -> BoxFuture<'_, ServerResult<()>> {
        Box::pin(async move {
            let mut meetings = self.meetings.write().await;
            match meetings.get_mut(&meeting.id) {
                Some(stored) => {
                    *stored = meeting;
                    Ok(())
                }
                None => Err(ServerError::not_found(meeting.id)),
            }
        })
    }

    fn set_status(&self, id: &str, status: MeetingStatus) -> BoxFuture<'_, ServerResult<Meeting>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut meetings = self.meetings.write().await;
            let stored = meetings
                .get_mut(&id)
                .ok_or_else(|| ServerError::not_found(&id))?;
            stored.status = status;
            Ok(stored.clone())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, ServerResult<bool>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.meetings.write().await.remove(&id).is_some()) })
    }

    fn list(&self) -> BoxFuture<'_, ServerResult<Vec<Meeting>>> {
        Box::pin(async move { Ok(self.meetings.read().await.values().cloned().collect()) })
    }
}
