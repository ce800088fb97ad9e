//! Meeting state machine.
//!
//! ```text
//! SCHEDULED ──start job / early entry──▶ ACTIVE ──end──▶ ENDED
//!     │
//!     └──cancel──▶ CANCELLED
//! ```
//!
//! A scheduled meeting owns a job set in the [`JobScheduler`]: one reminder
//! per configured offset that is still in the future, plus the start job.
//! Recurring meetings chain: starting one occurrence persists and arms the
//! next, never more than one ahead.
//!
//! Transitions of one meeting are serialised by a per-meeting lock. Arming
//! only uses [`JobScheduler::schedule_if_future`], which hands a due job back
//! instead of running it, so no callback runs while its meeting's lock is
//! held by the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rendezvous_core::{
    BusyInterval, FreeSlot, Meeting, MeetingStatus, MeetingUpdate, NewMeeting, TimeWindow,
    find_free_slots, minutes_until_ceil,
};
use rendezvous_protocol::{NotificationEvent, ReportCompletion};

use crate::config::LifecycleConfig;
use crate::directory::UserDirectory;
use crate::error::{ServerError, ServerResult};
use crate::hub::{DeliveryReport, NotificationHub};
use crate::jobs::{CancelReport, JobCallback, JobId, JobScheduler, job};
use crate::recipients::{RecipientResolver, meeting_recipients};
use crate::store::MeetingStore;

/// Result of a participant trying to enter a scheduled meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EarlyEntry {
    /// The meeting started now.
    Entered(Meeting),
    /// Too early; nothing changed.
    NotYet { minutes_until_start: i64 },
    /// The meeting was already running.
    AlreadyActive(Meeting),
}

/// Outcome of arming a meeting's job set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Armed {
    /// Number of jobs now pending.
    Jobs(usize),
    /// The start time has passed; the meeting must start right away.
    Due,
}

/// Drives meetings through their states.
pub struct MeetingLifecycle {
    store: Arc<dyn MeetingStore>,
    scheduler: Arc<JobScheduler>,
    hub: NotificationHub,
    resolver: RecipientResolver,
    config: LifecycleConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    this: Weak<MeetingLifecycle>,
}

impl MeetingLifecycle {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        scheduler: Arc<JobScheduler>,
        hub: NotificationHub,
        directory: Arc<dyn UserDirectory>,
        config: LifecycleConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            scheduler,
            hub,
            resolver: RecipientResolver::new(directory)
                .with_chain(config.recipient_chain.clone()),
            config,
            locks: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn MeetingStore> {
        &self.store
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Current time according to the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.scheduler.now()
    }

    /// Books a meeting.
    ///
    /// Without a start time the meeting is created `Active` right away and
    /// `meeting_created` goes out; otherwise this is
    /// [`schedule_meeting`](Self::schedule_meeting).
    pub async fn book(&self, new: NewMeeting, initiator: Option<&str>) -> ServerResult<Meeting> {
        if new.scheduled_at.is_some() {
            return self.schedule_meeting(new, initiator).await;
        }
        validate(&new)?;

        let meeting = Meeting::from_new(new_meeting_id(), new);
        self.bounded("insert meeting", self.store.insert(meeting.clone()))
            .await?;
        info!(meeting_id = %meeting.id, topic = %meeting.topic, "Instant meeting created");
        self.notify(
            &meeting,
            initiator,
            NotificationEvent::MeetingCreated {
                meeting: meeting.clone(),
            },
        )
        .await;
        Ok(meeting)
    }

    /// Persists a meeting with a start time and arms its job set.
    ///
    /// A start time that has already passed starts the meeting immediately.
    pub async fn schedule_meeting(
        &self,
        new: NewMeeting,
        initiator: Option<&str>,
    ) -> ServerResult<Meeting> {
        if new.scheduled_at.is_none() {
            return Err(ServerError::invalid_request(
                "a scheduled meeting needs a start time",
            ));
        }
        validate(&new)?;

        let meeting = Meeting::from_new(new_meeting_id(), new);
        self.bounded("insert meeting", self.store.insert(meeting.clone()))
            .await?;
        info!(
            meeting_id = %meeting.id,
            topic = %meeting.topic,
            scheduled_at = ?meeting.scheduled_at,
            recurrence = ?meeting.recurrence_rule,
            "Meeting scheduled"
        );
        self.notify(
            &meeting,
            initiator,
            NotificationEvent::MeetingScheduled {
                meeting: meeting.clone(),
            },
        )
        .await;

        let id = meeting.id.clone();
        self.locked(&id, async {
            match self.arm(&meeting).await {
                Armed::Jobs(_) => Ok(meeting),
                Armed::Due => self.start_chain(meeting, None).await,
            }
        })
        .await
    }

    /// Handles the start job of a meeting.
    ///
    /// A meeting that is no longer scheduled is left alone.
    #[tracing::instrument(skip(self))]
    pub async fn on_start_job_fired(&self, meeting_id: &str) -> ServerResult<()> {
        self.locked(meeting_id, async {
            let meeting = self.load(meeting_id).await?;
            if meeting.status != MeetingStatus::Scheduled {
                debug!(
                    meeting_id,
                    status = %meeting.status,
                    "Start job fired for a meeting no longer scheduled"
                );
                return Ok(());
            }
            self.start_chain(meeting, None).await?;
            Ok(())
        })
        .await
    }

    /// Handles a reminder job: notifies participants if the meeting is still
    /// scheduled.
    #[tracing::instrument(skip(self))]
    pub async fn on_reminder_fired(
        &self,
        meeting_id: &str,
        minutes_before: u32,
    ) -> ServerResult<DeliveryReport> {
        self.locked(meeting_id, async {
            let meeting = self.load(meeting_id).await?;
            if meeting.status != MeetingStatus::Scheduled {
                debug!(meeting_id, status = %meeting.status, "Reminder skipped");
                return Ok(DeliveryReport::default());
            }
            let Some(event) = NotificationEvent::reminder(&meeting, minutes_before) else {
                return Ok(DeliveryReport::default());
            };
            Ok(self.notify(&meeting, None, event).await)
        })
        .await
    }

    /// Lets `user_id` into a meeting, starting it early when inside the
    /// early-entry window.
    pub async fn attempt_early_entry(
        &self,
        meeting_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ServerResult<EarlyEntry> {
        self.locked(meeting_id, async {
            let meeting = self.load(meeting_id).await?;
            match meeting.status {
                MeetingStatus::Active => return Ok(EarlyEntry::AlreadyActive(meeting)),
                MeetingStatus::Scheduled => {}
                status => {
                    return Err(ServerError::invalid_transition(meeting_id, status, "enter"));
                }
            }

            if let Some(start) = meeting.scheduled_at
                && now < start - self.config.early_entry_window
            {
                let minutes_until_start = minutes_until_ceil(now, start);
                debug!(meeting_id, user_id, minutes_until_start, "Entry refused, too early");
                return Ok(EarlyEntry::NotYet {
                    minutes_until_start,
                });
            }

            let report = self.scheduler.cancel_all(meeting_id).await;
            debug!(
                meeting_id,
                cancelled = report.cancelled.len(),
                "Pending jobs dropped for early entry"
            );
            info!(meeting_id, user_id, "Meeting entered early");
            let started = self.start_chain(meeting, Some(user_id)).await?;
            Ok(EarlyEntry::Entered(started))
        })
        .await
    }

    /// Cancels a scheduled meeting and its pending jobs.
    pub async fn cancel_meeting(
        &self,
        meeting_id: &str,
        initiator: Option<&str>,
    ) -> ServerResult<(Meeting, CancelReport)> {
        self.locked(meeting_id, async {
            let meeting = self.load(meeting_id).await?;
            if !meeting.status.can_transition_to(MeetingStatus::Cancelled) {
                return Err(ServerError::invalid_transition(
                    meeting_id,
                    meeting.status,
                    "cancel",
                ));
            }

            let report = self.scheduler.cancel_all(meeting_id).await;
            let cancelled = self
                .bounded(
                    "update meeting status",
                    self.store.set_status(meeting_id, MeetingStatus::Cancelled),
                )
                .await?;
            info!(
                meeting_id,
                jobs_cancelled = report.cancelled.len(),
                jobs_not_found = report.not_found.len(),
                "Meeting cancelled"
            );
            self.notify(
                &cancelled,
                initiator,
                NotificationEvent::cancelled(&cancelled, initiator),
            )
            .await;
            Ok((cancelled, report))
        })
        .await
    }

    /// Edits a scheduled meeting.
    ///
    /// Moving the start time replaces the whole job set and announces the
    /// meeting again; other edits are written in place.
    pub async fn reschedule_meeting(
        &self,
        meeting_id: &str,
        update: MeetingUpdate,
    ) -> ServerResult<Meeting> {
        self.locked(meeting_id, async {
            let meeting = self.load(meeting_id).await?;
            if meeting.status != MeetingStatus::Scheduled {
                return Err(ServerError::invalid_transition(
                    meeting_id,
                    meeting.status,
                    "reschedule",
                ));
            }
            if update.is_empty() {
                return Ok(meeting);
            }
            validate_update(&update)?;

            let mut updated = meeting;
            if !updated.apply(&update) {
                self.bounded("update meeting", self.store.update(updated.clone()))
                    .await?;
                debug!(meeting_id, "Meeting details updated");
                return Ok(updated);
            }

            let report = self.scheduler.cancel_all(meeting_id).await;
            self.bounded("update meeting", self.store.update(updated.clone()))
                .await?;
            info!(
                meeting_id,
                scheduled_at = ?updated.scheduled_at,
                jobs_replaced = report.cancelled.len(),
                "Meeting rescheduled"
            );
            self.notify(
                &updated,
                None,
                NotificationEvent::MeetingScheduled {
                    meeting: updated.clone(),
                },
            )
            .await;
            match self.arm(&updated).await {
                Armed::Jobs(_) => Ok(updated),
                Armed::Due => self.start_chain(updated, None).await,
            }
        })
        .await
    }

    /// Ends a running meeting.
    pub async fn end_meeting(&self, meeting_id: &str) -> ServerResult<Meeting> {
        self.locked(meeting_id, async {
            let meeting = self.load(meeting_id).await?;
            if !meeting.status.can_transition_to(MeetingStatus::Ended) {
                return Err(ServerError::invalid_transition(
                    meeting_id,
                    meeting.status,
                    "end",
                ));
            }
            let ended = self
                .bounded(
                    "update meeting status",
                    self.store.set_status(meeting_id, MeetingStatus::Ended),
                )
                .await?;
            self.scheduler.cancel_all(meeting_id).await;
            info!(meeting_id, "Meeting ended");
            Ok(ended)
        })
        .await
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> ServerResult<Meeting> {
        self.load(meeting_id).await
    }

    pub async fn meeting_count(&self) -> ServerResult<usize> {
        Ok(self.bounded("list meetings", self.store.list()).await?.len())
    }

    /// Tells everyone concerned that a meeting report is ready.
    pub async fn report_complete(&self, report: &ReportCompletion) -> DeliveryReport {
        let recipients = self.resolver.resolve(report).await;
        let event = NotificationEvent::ReportComplete {
            report_id: report.report_id.clone(),
            meeting_id: report.meeting_id.clone(),
            title: report.title.clone(),
        };
        let delivery = self.hub.fan_out(&recipients, &event).await;
        info!(
            report_id = %report.report_id,
            meeting_id = %report.meeting_id,
            delivered = delivery.delivered.len(),
            dropped = delivery.dropped.len(),
            "Report completion sent"
        );
        delivery
    }

    pub fn find_free_slots(
        &self,
        busy: &[Vec<BusyInterval>],
        window: &TimeWindow,
        min_duration: chrono::Duration,
    ) -> Vec<FreeSlot> {
        find_free_slots(busy, window, min_duration)
    }

    /// Arms reminders and the start job for a scheduled meeting.
    ///
    /// Reminders whose fire time has passed are skipped, never fired late.
    /// Jobs go through [`JobScheduler::schedule_if_future`], which never runs
    /// a callback inline, so arming is safe under the meeting's lock. A start
    /// job found due drops whatever was armed and reports [`Armed::Due`].
    async fn arm(&self, meeting: &Meeting) -> Armed {
        let Some(start) = meeting.scheduled_at else {
            return Armed::Due;
        };
        if start <= self.scheduler.now() {
            return Armed::Due;
        }

        let mut armed = 0;
        for &minutes_before in &self.config.reminder_offsets {
            let fire_at = start - chrono::Duration::minutes(i64::from(minutes_before));
            let scheduled = self
                .scheduler
                .schedule_if_future(
                    JobId::reminder(&meeting.id, minutes_before),
                    fire_at,
                    self.reminder_job(&meeting.id, minutes_before),
                )
                .await;
            match scheduled {
                Ok(_) => armed += 1,
                Err(_) => {
                    debug!(meeting_id = %meeting.id, minutes_before, "Reminder time passed, skipped");
                }
            }
        }

        let scheduled = self
            .scheduler
            .schedule_if_future(JobId::start(&meeting.id), start, self.start_job(&meeting.id))
            .await;
        if scheduled.is_err() {
            let report = self.scheduler.cancel_all(&meeting.id).await;
            debug!(
                meeting_id = %meeting.id,
                dropped = report.cancelled.len(),
                "Start time passed while arming"
            );
            return Armed::Due;
        }
        armed += 1;

        debug!(meeting_id = %meeting.id, jobs = armed, "Job set armed");
        Armed::Jobs(armed)
    }

    fn reminder_job(&self, meeting_id: &str, minutes_before: u32) -> JobCallback {
        let this = self.this.clone();
        let meeting_id = meeting_id.to_string();
        job(move || async move {
            let Some(lifecycle) = this.upgrade() else {
                return Ok(());
            };
            lifecycle
                .on_reminder_fired(&meeting_id, minutes_before)
                .await
                .map(drop)
                .map_err(|e| e.to_string())
        })
    }

    fn start_job(&self, meeting_id: &str) -> JobCallback {
        let this = self.this.clone();
        let meeting_id = meeting_id.to_string();
        job(move || async move {
            let Some(lifecycle) = this.upgrade() else {
                return Ok(());
            };
            lifecycle
                .on_start_job_fired(&meeting_id)
                .await
                .map_err(|e| e.to_string())
        })
    }

    /// Starts `meeting` and keeps the recurrence chain one occurrence ahead.
    ///
    /// Occurrences whose start has already passed start in turn, so a long
    /// overdue series catches up without recursion. Returns the first
    /// meeting, now active.
    async fn start_chain(
        &self,
        meeting: Meeting,
        initiator: Option<&str>,
    ) -> ServerResult<Meeting> {
        let started = self.activate(&meeting.id, initiator).await?;
        let mut current = started.clone();
        while let Some(next) = self.spawn_next(&current).await? {
            match self.arm(&next).await {
                Armed::Jobs(_) => break,
                Armed::Due => current = self.activate(&next.id, None).await?,
            }
        }
        Ok(started)
    }

    async fn activate(&self, meeting_id: &str, initiator: Option<&str>) -> ServerResult<Meeting> {
        let started = self
            .bounded(
                "update meeting status",
                self.store.set_status(meeting_id, MeetingStatus::Active),
            )
            .await?;
        info!(
            meeting_id,
            recurrence_index = started.recurrence_index,
            "Meeting started"
        );
        self.notify(
            &started,
            initiator,
            NotificationEvent::MeetingStarted {
                meeting: started.clone(),
            },
        )
        .await;
        Ok(started)
    }

    /// Persists the next occurrence of a recurring meeting, if any.
    async fn spawn_next(&self, meeting: &Meeting) -> ServerResult<Option<Meeting>> {
        let Some(next) = meeting.spawn_occurrence(new_meeting_id()) else {
            if meeting.recurrence_rule.is_recurring() {
                info!(meeting_id = %meeting.id, "Recurring series finished");
            }
            return Ok(None);
        };
        self.bounded("insert meeting", self.store.insert(next.clone()))
            .await?;
        info!(
            meeting_id = %next.id,
            parent_meeting_id = ?next.parent_meeting_id,
            recurrence_index = next.recurrence_index,
            scheduled_at = ?next.scheduled_at,
            "Next occurrence scheduled"
        );
        self.notify(
            &next,
            None,
            NotificationEvent::MeetingScheduled {
                meeting: next.clone(),
            },
        )
        .await;
        Ok(Some(next))
    }

    async fn notify(
        &self,
        meeting: &Meeting,
        initiator: Option<&str>,
        event: NotificationEvent,
    ) -> DeliveryReport {
        let recipients = meeting_recipients(meeting, initiator);
        if recipients.is_empty() {
            debug!(meeting_id = %meeting.id, event = event.kind(), "No recipients");
            return DeliveryReport::default();
        }
        self.hub.fan_out(&recipients, &event).await
    }

    async fn load(&self, meeting_id: &str) -> ServerResult<Meeting> {
        self.bounded("load meeting", self.store.get(meeting_id))
            .await?
            .ok_or_else(|| ServerError::not_found(meeting_id))
    }

    /// Runs a store call under the configured callback timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = ServerResult<T>>,
    ) -> ServerResult<T> {
        match tokio::time::timeout(self.config.callback_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.config.callback_timeout, "Store call timed out");
                Err(ServerError::timeout(operation))
            }
        }
    }

    /// Runs `op` holding the transition lock of `meeting_id`.
    ///
    /// The map entry lives only while someone holds or waits for the lock,
    /// so idle meetings cost nothing.
    async fn locked<T>(
        &self,
        meeting_id: &str,
        op: impl Future<Output = ServerResult<T>>,
    ) -> ServerResult<T> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(meeting_id.to_string()).or_default())
        };
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        drop(lock);

        let mut locks = self.locks.lock().await;
        if locks
            .get(meeting_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(meeting_id);
        }
        result
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn new_meeting_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn validate(new: &NewMeeting) -> ServerResult<()> {
    if new.topic.trim().is_empty() {
        return Err(ServerError::invalid_request("topic must not be empty"));
    }
    if new.duration_minutes == 0 {
        return Err(ServerError::invalid_request("duration must be positive"));
    }
    if new.owner_id.trim().is_empty() {
        return Err(ServerError::invalid_request("owner must not be empty"));
    }
    Ok(())
}

fn validate_update(update: &MeetingUpdate) -> ServerResult<()> {
    if update.topic.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ServerError::invalid_request("topic must not be empty"));
    }
    if update.duration_minutes == Some(0) {
        return Err(ServerError::invalid_request("duration must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::directory::StaticUserDirectory;
    use crate::hub::Subscription;
    use crate::jobs::JobKind;
    use crate::recipients::RecipientSource;
    use crate::store::{BoxFuture, InMemoryMeetingStore};
    use chrono::{Duration, TimeZone};
    use rendezvous_core::RecurrenceRule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        lifecycle: Arc<MeetingLifecycle>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_store(Arc::new(InMemoryMeetingStore::new()), LifecycleConfig::default())
        }

        fn with_store(store: Arc<dyn MeetingStore>, config: LifecycleConfig) -> Self {
            let clock = Arc::new(ManualClock::new(t0()));
            let scheduler = JobScheduler::manual(clock.clone());
            let directory = StaticUserDirectory::new()
                .with_user("Alice", "alice")
                .with_user("Bob", "bob");
            let lifecycle = MeetingLifecycle::new(
                store,
                scheduler,
                NotificationHub::new(),
                Arc::new(directory),
                config,
            );
            Self { clock, lifecycle }
        }

        async fn advance(&self, minutes: i64) -> usize {
            self.clock.advance(Duration::minutes(minutes));
            self.lifecycle.scheduler().fire_due().await
        }

        async fn pending(&self, meeting_id: &str) -> Vec<JobKind> {
            self.lifecycle
                .scheduler()
                .pending(meeting_id)
                .await
                .into_iter()
                .map(|id| id.kind)
                .collect()
        }

        async fn status(&self, meeting_id: &str) -> MeetingStatus {
            self.lifecycle.get_meeting(meeting_id).await.unwrap().status
        }
    }

    fn standup(minutes_out: i64) -> NewMeeting {
        NewMeeting::new("standup", "alice", 15)
            .at(t0() + Duration::minutes(minutes_out))
            .with_participants(["alice", "bob"])
    }

    fn kinds(subscription: &mut Subscription) -> Vec<&'static str> {
        std::iter::from_fn(|| subscription.try_recv())
            .map(|event| event.kind())
            .collect()
    }

    fn reminder(minutes_before: u32) -> JobKind {
        JobKind::Reminder { minutes_before }
    }

    #[tokio::test]
    async fn instant_meeting_is_active_without_jobs() {
        let fx = Fixture::new();
        let mut bob = fx.lifecycle.hub().connect("bob").await;
        let mut alice = fx.lifecycle.hub().connect("alice").await;

        let new = NewMeeting::new("huddle", "alice", 10).with_participants(["alice", "bob"]);
        let meeting = fx.lifecycle.book(new, Some("alice")).await.unwrap();

        assert_eq!(meeting.status, MeetingStatus::Active);
        assert_eq!(fx.lifecycle.scheduler().pending_count().await, 0);
        assert_eq!(kinds(&mut bob), vec!["meeting_created"]);
        assert!(kinds(&mut alice).is_empty(), "initiator is not notified");
    }

    #[tokio::test]
    async fn hour_ahead_arms_both_reminders_and_start() {
        let fx = Fixture::new();
        let mut bob = fx.lifecycle.hub().connect("bob").await;

        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();

        assert_eq!(meeting.status, MeetingStatus::Scheduled);
        assert_eq!(
            fx.pending(&meeting.id).await,
            vec![reminder(30), reminder(5), JobKind::Start]
        );
        assert_eq!(kinds(&mut bob), vec!["meeting_scheduled"]);
    }

    #[tokio::test]
    async fn passed_reminder_offsets_are_skipped() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(20), None).await.unwrap();

        assert_eq!(
            fx.pending(&meeting.id).await,
            vec![reminder(5), JobKind::Start]
        );

        let meeting = fx.lifecycle.book(standup(3), None).await.unwrap();
        assert_eq!(fx.pending(&meeting.id).await, vec![JobKind::Start]);
    }

    #[tokio::test]
    async fn forty_minutes_out_keeps_the_thirty_minute_reminder() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(40), None).await.unwrap();

        assert_eq!(
            fx.pending(&meeting.id).await,
            vec![reminder(30), reminder(5), JobKind::Start]
        );
        assert_eq!(fx.advance(10).await, 1);
        assert_eq!(
            fx.pending(&meeting.id).await,
            vec![reminder(5), JobKind::Start]
        );
    }

    #[tokio::test]
    async fn reminders_then_start_fire_in_order() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        let mut bob = fx.lifecycle.hub().connect("bob").await;

        assert_eq!(fx.advance(30).await, 1);
        match bob.try_recv() {
            Some(NotificationEvent::MeetingReminder {
                meeting_id,
                minutes_before,
                scheduled_at,
                ..
            }) => {
                assert_eq!(meeting_id, meeting.id);
                assert_eq!(minutes_before, 30);
                assert_eq!(scheduled_at, t0() + Duration::minutes(60));
            }
            other => panic!("expected reminder, got {other:?}"),
        }

        assert_eq!(fx.advance(25).await, 1);
        assert_eq!(fx.advance(5).await, 1);
        assert_eq!(kinds(&mut bob), vec!["meeting_reminder", "meeting_started"]);
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Active);
        assert!(fx.pending(&meeting.id).await.is_empty());
    }

    #[tokio::test]
    async fn weekly_start_spawns_exactly_one_child() {
        let fx = Fixture::new();
        let until = t0() + Duration::days(8);
        let meeting = fx
            .lifecycle
            .book(standup(60).repeating(RecurrenceRule::Weekly, Some(until)), None)
            .await
            .unwrap();

        fx.advance(60).await;
        let meetings = fx.lifecycle.store().list().await.unwrap();
        assert_eq!(meetings.len(), 2);

        let child = meetings.iter().find(|m| m.id != meeting.id).unwrap();
        assert_eq!(child.status, MeetingStatus::Scheduled);
        assert_eq!(child.recurrence_index, 1);
        assert_eq!(child.parent_meeting_id.as_deref(), Some(meeting.id.as_str()));
        assert_eq!(
            child.scheduled_at,
            Some(t0() + Duration::minutes(60) + Duration::days(7))
        );
        assert_eq!(fx.pending(&child.id).await.len(), 3);

        // The next one would land past the end date.
        fx.advance(7 * 24 * 60).await;
        assert_eq!(fx.status(&child.id).await, MeetingStatus::Active);
        assert_eq!(fx.lifecycle.meeting_count().await.unwrap(), 2);
        assert_eq!(fx.lifecycle.scheduler().pending_count().await, 0);
    }

    #[tokio::test]
    async fn overdue_series_catches_up() {
        let fx = Fixture::new();
        let new = NewMeeting::new("daily", "alice", 15)
            .at(t0() - Duration::days(2) - Duration::hours(1))
            .repeating(RecurrenceRule::Daily, None);

        let meeting = fx.lifecycle.book(new, None).await.unwrap();

        assert_eq!(meeting.status, MeetingStatus::Active);
        let mut meetings = fx.lifecycle.store().list().await.unwrap();
        meetings.sort_by_key(|m| m.recurrence_index);
        let states: Vec<_> = meetings.iter().map(|m| m.status).collect();
        assert_eq!(
            states,
            vec![
                MeetingStatus::Active,
                MeetingStatus::Active,
                MeetingStatus::Active,
                MeetingStatus::Scheduled,
            ]
        );
        assert_eq!(meetings[3].scheduled_at, Some(t0() + Duration::hours(23)));
        assert_eq!(fx.pending(&meetings[3].id).await.len(), 3);
    }

    #[tokio::test]
    async fn cancel_after_first_reminder() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        let mut bob = fx.lifecycle.hub().connect("bob").await;
        let mut alice = fx.lifecycle.hub().connect("alice").await;

        fx.advance(31).await;
        kinds(&mut bob);

        let (cancelled, report) = fx
            .lifecycle
            .cancel_meeting(&meeting.id, Some("alice"))
            .await
            .unwrap();

        assert_eq!(cancelled.status, MeetingStatus::Cancelled);
        assert_eq!(
            report.cancelled,
            vec![JobId::reminder(&meeting.id, 5), JobId::start(&meeting.id)]
        );
        assert_eq!(report.not_found, vec![JobId::reminder(&meeting.id, 30)]);
        assert_eq!(kinds(&mut bob), vec!["meeting_cancelled"]);
        assert!(kinds(&mut alice).is_empty());

        assert_eq!(fx.advance(60).await, 0);
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Cancelled);
    }

    #[tokio::test]
    async fn final_states_reject_transitions() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        fx.lifecycle.cancel_meeting(&meeting.id, None).await.unwrap();

        let err = fx.lifecycle.cancel_meeting(&meeting.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::InvalidTransition {
                from: MeetingStatus::Cancelled,
                action: "cancel",
                ..
            }
        ));
        assert!(matches!(
            fx.lifecycle.attempt_early_entry(&meeting.id, "bob", t0()).await,
            Err(ServerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            fx.lifecycle
                .reschedule_meeting(&meeting.id, MeetingUpdate::default())
                .await,
            Err(ServerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            fx.lifecycle.end_meeting(&meeting.id).await,
            Err(ServerError::InvalidTransition { .. })
        ));

        // The start job is gone, so a stray fire is a no-op.
        fx.lifecycle.on_start_job_fired(&meeting.id).await.unwrap();
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Cancelled);
    }

    #[tokio::test]
    async fn early_entry_window() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(16), None).await.unwrap();
        let mut alice = fx.lifecycle.hub().connect("alice").await;

        let now = t0() + Duration::seconds(30);
        assert_eq!(
            fx.lifecycle
                .attempt_early_entry(&meeting.id, "bob", now)
                .await
                .unwrap(),
            EarlyEntry::NotYet {
                minutes_until_start: 16
            }
        );
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Scheduled);

        let now = t0() + Duration::minutes(11);
        let entered = fx
            .lifecycle
            .attempt_early_entry(&meeting.id, "bob", now)
            .await
            .unwrap();
        let EarlyEntry::Entered(started) = entered else {
            panic!("expected entry, got {entered:?}");
        };
        assert_eq!(started.status, MeetingStatus::Active);
        assert!(fx.pending(&meeting.id).await.is_empty());
        assert_eq!(kinds(&mut alice), vec!["meeting_started"]);

        // The cancelled start job must not fire a second time.
        assert_eq!(fx.advance(20).await, 0);
        assert!(matches!(
            fx.lifecycle
                .attempt_early_entry(&meeting.id, "alice", now)
                .await
                .unwrap(),
            EarlyEntry::AlreadyActive(_)
        ));
    }

    #[tokio::test]
    async fn early_entry_keeps_series_going() {
        let fx = Fixture::new();
        let meeting = fx
            .lifecycle
            .book(standup(4).repeating(RecurrenceRule::Daily, None), None)
            .await
            .unwrap();

        fx.lifecycle
            .attempt_early_entry(&meeting.id, "bob", t0())
            .await
            .unwrap();

        let child = fx
            .lifecycle
            .store()
            .list()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id != meeting.id)
            .unwrap();
        assert_eq!(
            child.scheduled_at,
            Some(t0() + Duration::minutes(4) + Duration::days(1))
        );
        assert_eq!(fx.pending(&child.id).await.len(), 3);
    }

    #[tokio::test]
    async fn reschedule_replaces_job_set() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        let mut bob = fx.lifecycle.hub().connect("bob").await;

        let update = MeetingUpdate {
            scheduled_at: Some(t0() + Duration::minutes(120)),
            ..Default::default()
        };
        let moved = fx
            .lifecycle
            .reschedule_meeting(&meeting.id, update)
            .await
            .unwrap();

        assert_eq!(moved.scheduled_at, Some(t0() + Duration::minutes(120)));
        assert_eq!(kinds(&mut bob), vec!["meeting_scheduled"]);
        assert_eq!(fx.pending(&meeting.id).await.len(), 3);

        // Nothing left at the old times.
        assert_eq!(fx.advance(60).await, 0);
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Scheduled);
        assert_eq!(fx.advance(30).await, 1);
    }

    #[tokio::test]
    async fn reschedule_without_time_change_keeps_jobs() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        let mut bob = fx.lifecycle.hub().connect("bob").await;

        let update = MeetingUpdate {
            topic: Some("retro".into()),
            duration_minutes: Some(45),
            ..Default::default()
        };
        let edited = fx
            .lifecycle
            .reschedule_meeting(&meeting.id, update)
            .await
            .unwrap();

        assert_eq!(edited.topic, "retro");
        assert_eq!(edited.duration_minutes, 45);
        assert_eq!(fx.pending(&meeting.id).await.len(), 3);
        assert!(kinds(&mut bob).is_empty());
    }

    #[tokio::test]
    async fn reschedule_into_the_past_starts_now() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();

        let update = MeetingUpdate {
            scheduled_at: Some(t0() - Duration::minutes(1)),
            ..Default::default()
        };
        let started = fx
            .lifecycle
            .reschedule_meeting(&meeting.id, update)
            .await
            .unwrap();

        assert_eq!(started.status, MeetingStatus::Active);
        assert!(fx.pending(&meeting.id).await.is_empty());
    }

    #[tokio::test]
    async fn past_start_time_starts_immediately() {
        let fx = Fixture::new();
        let mut bob = fx.lifecycle.hub().connect("bob").await;

        let meeting = fx.lifecycle.book(standup(-10), None).await.unwrap();

        assert_eq!(meeting.status, MeetingStatus::Active);
        assert_eq!(fx.lifecycle.scheduler().pending_count().await, 0);
        assert_eq!(kinds(&mut bob), vec!["meeting_scheduled", "meeting_started"]);
    }

    #[tokio::test]
    async fn end_meeting_only_from_active() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();

        assert!(matches!(
            fx.lifecycle.end_meeting(&meeting.id).await,
            Err(ServerError::InvalidTransition {
                from: MeetingStatus::Scheduled,
                ..
            })
        ));

        fx.advance(60).await;
        let ended = fx.lifecycle.end_meeting(&meeting.id).await.unwrap();
        assert_eq!(ended.status, MeetingStatus::Ended);
    }

    #[tokio::test]
    async fn bad_input_is_rejected() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.lifecycle
                .book(NewMeeting::new("  ", "alice", 15), None)
                .await,
            Err(ServerError::InvalidRequest { .. })
        ));
        assert!(matches!(
            fx.lifecycle
                .schedule_meeting(NewMeeting::new("sync", "alice", 15), None)
                .await,
            Err(ServerError::InvalidRequest { .. })
        ));
        assert!(matches!(
            fx.lifecycle.get_meeting("missing").await,
            Err(ServerError::MeetingNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn report_completion_uses_directory() {
        let fx = Fixture::new();
        let mut bob = fx.lifecycle.hub().connect("bob").await;

        let report = ReportCompletion {
            report_id: "r1".into(),
            meeting_id: "m1".into(),
            title: "Weekly retro".into(),
            attendee_names: vec!["BOB".into(), "Alice".into()],
            ..Default::default()
        };
        let delivery = fx.lifecycle.report_complete(&report).await;

        assert_eq!(delivery.delivered, vec!["bob"]);
        assert_eq!(delivery.dropped, vec!["alice"]);
        assert_eq!(kinds(&mut bob), vec!["report_complete"]);
    }

    #[tokio::test]
    async fn free_slots_pass_through() {
        let fx = Fixture::new();
        let window = TimeWindow::new(t0(), t0() + Duration::hours(3)).unwrap();
        let busy = vec![vec![BusyInterval::new(
            t0() + Duration::hours(1),
            t0() + Duration::minutes(90),
        )]];

        let slots = fx
            .lifecycle
            .find_free_slots(&busy, &window, Duration::minutes(30));
        assert_eq!(slots.len(), 2);
    }

    #[tokio::test]
    async fn reschedule_after_start_is_rejected() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        assert_eq!(fx.advance(60).await, 3);
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Active);

        let update = MeetingUpdate {
            scheduled_at: Some(t0() + Duration::hours(2)),
            ..Default::default()
        };
        let err = fx
            .lifecycle
            .reschedule_meeting(&meeting.id, update)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::InvalidTransition {
                from: MeetingStatus::Active,
                action: "reschedule",
                ..
            }
        ));
        assert!(fx.pending(&meeting.id).await.is_empty());
    }

    #[tokio::test]
    async fn transition_locks_are_released() {
        let fx = Fixture::new();
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();
        assert_eq!(fx.lifecycle.lock_count().await, 0);

        let update = MeetingUpdate {
            topic: Some("daily standup".into()),
            ..Default::default()
        };
        fx.lifecycle
            .reschedule_meeting(&meeting.id, update)
            .await
            .unwrap();
        fx.advance(60).await;
        assert_eq!(fx.status(&meeting.id).await, MeetingStatus::Active);
        assert_eq!(fx.lifecycle.lock_count().await, 0);
    }

    #[tokio::test]
    async fn recipient_chain_comes_from_config() {
        let config =
            LifecycleConfig::default().with_recipient_chain([RecipientSource::SpeakerNames]);
        let fx = Fixture::with_store(Arc::new(InMemoryMeetingStore::new()), config);
        let _bob = fx.lifecycle.hub().connect("bob").await;

        let report = ReportCompletion {
            report_id: "r1".into(),
            meeting_id: "m1".into(),
            title: "Weekly retro".into(),
            participant_ids: vec!["alice".into()],
            speaker_names: vec!["Bob".into()],
            ..Default::default()
        };
        let delivery = fx.lifecycle.report_complete(&report).await;

        assert_eq!(delivery.delivered, vec!["bob"]);
        assert!(delivery.dropped.is_empty());
    }

    /// Clock that jumps two hours ahead after its first reading.
    struct SteppingClock {
        reads: AtomicUsize,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                t0()
            } else {
                t0() + Duration::hours(2)
            }
        }
    }

    #[tokio::test]
    async fn start_falling_due_while_arming_starts_meeting() {
        let clock = Arc::new(SteppingClock {
            reads: AtomicUsize::new(0),
        });
        let lifecycle = MeetingLifecycle::new(
            Arc::new(InMemoryMeetingStore::new()),
            JobScheduler::manual(clock),
            NotificationHub::new(),
            Arc::new(StaticUserDirectory::new()),
            LifecycleConfig::default(),
        );

        let booked = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            lifecycle.book(standup(60), None),
        )
        .await
        .expect("booking must not wait on its own meeting lock")
        .unwrap();

        assert_eq!(booked.status, MeetingStatus::Active);
        assert_eq!(lifecycle.scheduler().pending_count().await, 0);
        assert_eq!(lifecycle.lock_count().await, 0);
    }

    /// Store whose reads never complete.
    struct StalledStore(InMemoryMeetingStore);

    impl MeetingStore for StalledStore {
        fn insert(&self, meeting: Meeting) -> BoxFuture<'_, ServerResult<()>> {
            self.0.insert(meeting)
        }

        fn get(&self, _id: &str) -> BoxFuture<'_, ServerResult<Option<Meeting>>> {
            Box::pin(std::future::pending())
        }

        fn update(&self, meeting: Meeting) -> BoxFuture<'_, ServerResult<()>> {
            self.0.update(meeting)
        }

        fn set_status(
            &self,
            id: &str,
            status: MeetingStatus,
        ) -> BoxFuture<'_, ServerResult<Meeting>> {
            self.0.set_status(id, status)
        }

        fn delete(&self, id: &str) -> BoxFuture<'_, ServerResult<bool>> {
            self.0.delete(id)
        }

        fn list(&self) -> BoxFuture<'_, ServerResult<Vec<Meeting>>> {
            self.0.list()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out_inside_callback() {
        let config =
            LifecycleConfig::default().with_callback_timeout(std::time::Duration::from_secs(1));
        let fx = Fixture::with_store(
            Arc::new(StalledStore(InMemoryMeetingStore::new())),
            config,
        );
        let meeting = fx.lifecycle.book(standup(60), None).await.unwrap();

        assert!(matches!(
            fx.lifecycle.on_start_job_fired(&meeting.id).await,
            Err(ServerError::Timeout { .. })
        ));

        // The failing reminder is contained by the scheduler.
        assert_eq!(fx.advance(30).await, 1);
        assert_eq!(fx.lifecycle.scheduler().pending_count().await, 2);
    }
}
