//! One-shot job scheduler for reminders and meeting starts.
//!
//! Every armed job is an explicit registry entry holding its fire time, its
//! callback and the handle of the timer task that will fire it. Firing is
//! "look up, remove, invoke": the entry leaves the registry before the
//! callback runs, so a callback may freely schedule or cancel other jobs.
//!
//! Jobs live in memory only. A restart loses everything still pending.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

use crate::clock::Clock;

/// Future returned by a job callback.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

/// Work to run when a job fires.
pub type JobCallback = Box<dyn FnOnce() -> JobFuture + Send + 'static>;

/// Wraps an async closure as a [`JobCallback`].
pub fn job<F, Fut>(f: F) -> JobCallback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Box::new(move || -> JobFuture { Box::pin(f()) })
}

/// What a job does for its meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    /// Reminder sent `minutes_before` the start.
    Reminder { minutes_before: u32 },
    /// Start trigger at the scheduled time.
    Start,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reminder { minutes_before } => write!(f, "reminder-{minutes_before}m"),
            Self::Start => f.write_str("start"),
        }
    }
}

/// Handle of a job: the meeting it belongs to plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub meeting_id: String,
    pub kind: JobKind,
}

impl JobId {
    pub fn reminder(meeting_id: impl Into<String>, minutes_before: u32) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            kind: JobKind::Reminder { minutes_before },
        }
    }

    pub fn start(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            kind: JobKind::Start,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.meeting_id, self.kind)
    }
}

/// Result of cancelling a meeting's job set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Jobs that were still pending and will not fire.
    pub cancelled: Vec<JobId>,
    /// Jobs of the set that had already fired or been cancelled.
    pub not_found: Vec<JobId>,
}

/// How armed jobs get fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringMode {
    /// A tokio timer task per job.
    Timers,
    /// Only [`JobScheduler::fire_due`] fires jobs.
    Manual,
}

struct ArmedJob {
    fire_at: DateTime<Utc>,
    callback: JobCallback,
    timer: Option<AbortHandle>,
}

impl ArmedJob {
    fn disarm(self) -> JobCallback {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.callback
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<JobId, ArmedJob>,
    /// Every handle scheduled per meeting since its set was last discarded.
    sets: HashMap<String, Vec<JobId>>,
}

impl Registry {
    fn record(&mut self, id: &JobId) {
        let set = self.sets.entry(id.meeting_id.clone()).or_default();
        if !set.contains(id) {
            set.push(id.clone());
        }
    }

    /// Forgets a meeting's set once nothing in it is pending.
    fn prune(&mut self, meeting_id: &str) {
        let drained = self
            .sets
            .get(meeting_id)
            .is_some_and(|set| set.iter().all(|id| !self.active.contains_key(id)));
        if drained {
            self.sets.remove(meeting_id);
        }
    }
}

/// In-memory one-shot job scheduler.
pub struct JobScheduler {
    clock: Arc<dyn Clock>,
    mode: FiringMode,
    registry: Mutex<Registry>,
    this: Weak<JobScheduler>,
}

impl JobScheduler {
    /// Creates a scheduler firing jobs from tokio timers.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_mode(clock, FiringMode::Timers)
    }

    /// Creates a scheduler that only fires on [`fire_due`](Self::fire_due).
    pub fn manual(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_mode(clock, FiringMode::Manual)
    }

    pub fn with_mode(clock: Arc<dyn Clock>, mode: FiringMode) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            clock,
            mode,
            registry: Mutex::new(Registry::default()),
            this: this.clone(),
        })
    }

    /// Current time according to the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Arms `callback` to run at `fire_at`.
    ///
    /// A `fire_at` that is not in the future runs the callback right away,
    /// before this returns. Scheduling an id that is already pending replaces
    /// the earlier job.
    pub async fn schedule(&self, id: JobId, fire_at: DateTime<Utc>, callback: JobCallback) -> JobId {
        let callback = match self.schedule_if_future(id.clone(), fire_at, callback).await {
            Ok(id) => return id,
            Err(callback) => callback,
        };

        debug!(job = %id, %fire_at, "Job already due, running inline");
        {
            let mut registry = self.registry.lock().await;
            if let Some(previous) = registry.active.remove(&id) {
                debug!(job = %id, "Dropping pending job replaced by an inline run");
                drop(previous.disarm());
            }
            registry.record(&id);
        }
        self.dispatch(&id, callback).await;
        self.registry.lock().await.prune(&id.meeting_id);
        id
    }

    /// Arms `callback` only if `fire_at` is still in the future.
    ///
    /// Never runs the callback: when the job is already due it is handed
    /// back untouched and nothing is recorded. The clock is read under the
    /// registry lock, so the decision and the arming see the same time.
    pub async fn schedule_if_future(
        &self,
        id: JobId,
        fire_at: DateTime<Utc>,
        callback: JobCallback,
    ) -> Result<JobId, JobCallback> {
        let mut registry = self.registry.lock().await;
        let now = self.clock.now();
        if fire_at <= now {
            return Err(callback);
        }

        if let Some(previous) = registry.active.remove(&id) {
            debug!(job = %id, "Replacing pending job");
            drop(previous.disarm());
        }
        let timer = match self.mode {
            FiringMode::Timers => Some(self.spawn_timer(id.clone(), fire_at - now)),
            FiringMode::Manual => None,
        };
        registry.active.insert(
            id.clone(),
            ArmedJob {
                fire_at,
                callback,
                timer,
            },
        );
        registry.record(&id);
        debug!(job = %id, %fire_at, "Job armed");
        Ok(id)
    }

    fn spawn_timer(&self, id: JobId, delay: chrono::Duration) -> AbortHandle {
        let scheduler = self.this.clone();
        let delay = delay.to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.fire(&id).await;
            }
        })
        .abort_handle()
    }

    /// Fires one job now if it is still pending.
    ///
    /// Returns false when the job had already fired or been cancelled.
    pub async fn fire(&self, id: &JobId) -> bool {
        let Some(armed) = self.registry.lock().await.active.remove(id) else {
            trace!(job = %id, "Job no longer pending");
            return false;
        };
        // The timer may be the task running this very call; it is not aborted.
        self.dispatch(id, armed.callback).await;
        self.registry.lock().await.prune(&id.meeting_id);
        true
    }

    /// Fires every pending job whose time has come, earliest first.
    ///
    /// Returns the number of jobs fired.
    pub async fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due = {
            let mut registry = self.registry.lock().await;
            let mut ids: Vec<(DateTime<Utc>, JobId)> = registry
                .active
                .iter()
                .filter(|(_, armed)| armed.fire_at <= now)
                .map(|(id, armed)| (armed.fire_at, id.clone()))
                .collect();
            ids.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.kind.cmp(&b.1.kind)));
            ids.into_iter()
                .filter_map(|(_, id)| {
                    let armed = registry.active.remove(&id)?;
                    Some((id, armed.disarm()))
                })
                .collect::<Vec<_>>()
        };

        let fired = due.len();
        for (id, callback) in due {
            self.dispatch(&id, callback).await;
            self.registry.lock().await.prune(&id.meeting_id);
        }
        fired
    }

    /// Cancels one pending job. Returns false if it was not pending.
    pub async fn cancel(&self, id: &JobId) -> bool {
        let mut registry = self.registry.lock().await;
        let Some(armed) = registry.active.remove(id) else {
            return false;
        };
        drop(armed.disarm());
        registry.prune(&id.meeting_id);
        debug!(job = %id, "Job cancelled");
        true
    }

    /// Cancels every job recorded for a meeting and discards its set.
    ///
    /// Handles that already fired or were cancelled are reported in
    /// `not_found`. Calling it again returns an empty report.
    pub async fn cancel_all(&self, meeting_id: &str) -> CancelReport {
        let mut registry = self.registry.lock().await;
        let mut report = CancelReport::default();
        for id in registry.sets.remove(meeting_id).unwrap_or_default() {
            match registry.active.remove(&id) {
                Some(armed) => {
                    drop(armed.disarm());
                    report.cancelled.push(id);
                }
                None => report.not_found.push(id),
            }
        }
        debug!(
            meeting_id,
            cancelled = report.cancelled.len(),
            not_found = report.not_found.len(),
            "Job set cancelled"
        );
        report
    }

    /// Pending jobs of a meeting, in the order they were scheduled.
    pub async fn pending(&self, meeting_id: &str) -> Vec<JobId> {
        let registry = self.registry.lock().await;
        registry
            .sets
            .get(meeting_id)
            .map(|set| {
                set.iter()
                    .filter(|id| registry.active.contains_key(*id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of pending jobs across all meetings.
    pub async fn pending_count(&self) -> usize {
        self.registry.lock().await.active.len()
    }

    /// Drops every pending job without running it.
    pub async fn clear(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let dropped = registry.active.len();
        for (_, armed) in registry.active.drain() {
            drop(armed.disarm());
        }
        registry.sets.clear();
        dropped
    }

    async fn dispatch(&self, id: &JobId, callback: JobCallback) {
        trace!(job = %id, "Running job callback");
        let outcome = AssertUnwindSafe(async move { callback().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => debug!(job = %id, "Job completed"),
            Ok(Err(message)) => warn!(job = %id, error = %message, "Job callback failed"),
            Err(panic) => error!(job = %id, panic = panic_message(&*panic), "Job callback panicked"),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
