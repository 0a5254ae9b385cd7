//! The Pending and Running job maps.
//!
//! These are the only state shared between jobs. Promotion from Pending to
//! Running goes through a single `DashMap::remove`, so a job id is consumed
//! at most once even when two connections race for it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runner::{ActionProgram, FailureHandlers, ReplySlot, TransportError};
use crate::types::JobId;

/// A dispatched job whose runner has not connected yet.
#[derive(Debug)]
pub struct PendingJob {
    pub program: ActionProgram,
    pub on_failure: FailureHandlers,
    pub name: Option<String>,
    pub queued_at: Instant,
}

/// Routing information for a connected job. The channel itself belongs to
/// the job's worker; this is only what the socket side needs to reach it.
#[derive(Clone)]
pub struct RunningJob {
    pub slot: Arc<ReplySlot>,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

/// Lifecycle state of a job id known to the registry.
///
/// Closed jobs are forgotten, so they are indistinguishable from ids that were
/// never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
}

/// Shared by the registry, the socket tasks, the expiry timers and every
/// job worker, so it must be `Sync`.
#[derive(Default)]
pub struct JobTable {
    // Steps are `Send` but not `Sync`; the mutex makes the entry shareable.
    // It is only ever locked to take the job out.
    pending: DashMap<JobId, Mutex<PendingJob>>,
    running: DashMap<JobId, RunningJob>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_pending(&self, id: JobId, job: PendingJob) {
        self.pending.insert(id, Mutex::new(job));
    }

    /// Removes a pending job. Returns `None` when the id is unknown, expired,
    /// or already promoted.
    pub(crate) fn take_pending(&self, id: JobId) -> Option<PendingJob> {
        self.pending
            .remove(&id)
            .map(|(_, job)| job.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn insert_running(&self, id: JobId, job: RunningJob) {
        self.running.insert(id, job);
    }

    pub(crate) fn running(&self, id: JobId) -> Option<RunningJob> {
        self.running.get(&id).map(|entry| entry.value().clone())
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        if self.pending.contains_key(&id) {
            Some(JobState::Pending)
        } else if self.running.contains_key(&id) {
            Some(JobState::Running)
        } else {
            None
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Moves a running job to Closed.
    ///
    /// A `forced` close (the connection died under the job) cancels the job
    /// and releases its worker if it is blocked on a reply. Returns whether the
    /// job was still running.
    pub fn close(&self, id: JobId, forced: bool) -> bool {
        let Some((_, job)) = self.running.remove(&id) else {
            return false;
        };
        if forced {
            job.cancel.cancel();
            job.slot.close(TransportError::ConnectionClosed);
        }
        debug!(job = %id, forced, elapsed = ?job.started_at.elapsed(), "job closed");
        true
    }

    /// Releases every running worker with `reason` and drops all pending jobs.
    pub(crate) fn close_all(&self, reason: TransportError) -> usize {
        for entry in self.running.iter() {
            entry.cancel.cancel();
            entry.slot.close(reason.clone());
        }
        self.running.clear();
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
