//! Dispatch and connection registry.
//!
//! The registry owns every job from `queue` until its runner connects, then
//! hands the job to a dedicated worker and keeps only what the socket side
//! needs to route frames and close events to it.
//!
//! # Job lifecycle
//!
//! ```text
//! queue() ──► Pending ──connect()──► Running ──stop / failure / disconnect──► Closed
//!                │
//!                └── pending TTL elapsed ──► Closed (failure handlers run without a runner)
//! ```
//!
//! There is no retry or re-dispatch here: a caller that wants another attempt
//! queues again and gets a fresh id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::protocol::parse_frame;
use crate::runner::{ActionRunner, Outbound, ProtocolViolation, ReplySlot, TransportError};
use crate::types::JobId;

use super::builder::QueuedAction;
use super::job::{JobOutcome, execute};
use super::launcher::{JobLauncher, LaunchRequest, WorkflowTarget};
use super::table::{JobState, JobTable, PendingJob, RunningJob};

/// How long a dispatched job may wait for its runner by default.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(30 * 60);

/// Errors from [`Registry::queue`].
#[derive(Debug, Error)]
pub enum DispatchError<E: std::error::Error + 'static> {
    /// Neither the action nor the registry names a workflow to dispatch.
    #[error("no workflow target configured for the action")]
    NoTarget,

    #[error("registry is shutting down")]
    ShuttingDown,

    /// The platform refused to start the runner. The job was not kept.
    #[error("failed to start runner: {0}")]
    Launch(#[source] E),
}

/// Errors from [`Registry::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Never issued, already connected, expired, or closed.
    #[error("no pending job {0}")]
    UnknownJob(JobId),

    #[error("registry is shutting down")]
    ShuttingDown,
}

/// Configuration for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Callback address handed to runners; [`RegistryConfig::ID_PLACEHOLDER`]
    /// is replaced with the job id.
    pub callback_url_template: String,

    /// How long a job may stay Pending before it is abandoned.
    pub pending_ttl: Duration,

    /// Workflow used for actions that do not name their own.
    pub default_target: Option<WorkflowTarget>,
}

impl RegistryConfig {
    pub const ID_PLACEHOLDER: &'static str = "<id>";

    pub fn new(callback_url_template: impl Into<String>) -> Self {
        RegistryConfig {
            callback_url_template: callback_url_template.into(),
            pending_ttl: DEFAULT_PENDING_TTL,
            default_target: None,
        }
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn with_default_target(mut self, target: WorkflowTarget) -> Self {
        self.default_target = Some(target);
        self
    }

    pub fn callback_url(&self, id: JobId) -> String {
        self.callback_url_template
            .replace(Self::ID_PLACEHOLDER, &id.to_string())
    }
}

/// A promoted job, as seen by the socket task that serves it.
pub struct Connection {
    pub job: JobId,
    /// Frames the worker wants written, in order.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Resolves when the worker has finished (program, handlers, teardown).
    pub worker: JoinHandle<JobOutcome>,
    /// Cancelled on forced close or registry shutdown.
    pub cancel: CancellationToken,
}

/// Tracks dispatched jobs and binds inbound connections to them.
pub struct Registry<L> {
    table: Arc<JobTable>,
    launcher: L,
    config: RegistryConfig,
    shutdown: CancellationToken,
}

impl<L: JobLauncher> Registry<L> {
    pub fn new(launcher: L, config: RegistryConfig) -> Self {
        Self::new_with_shutdown(launcher, config, CancellationToken::new())
    }

    pub fn new_with_shutdown(
        launcher: L,
        config: RegistryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            callback = %config.callback_url_template,
            pending_ttl = ?config.pending_ttl,
            "Creating runner registry"
        );
        Registry {
            table: Arc::new(JobTable::new()),
            launcher,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatches a runner for `action` and records the job as Pending.
    ///
    /// Returns as soon as the platform has accepted the launch; the runner
    /// connects later.
    #[instrument(skip(self, action), fields(os = %action.os))]
    pub async fn queue(&self, action: QueuedAction) -> Result<JobId, DispatchError<L::Error>> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        let QueuedAction {
            program,
            on_failure,
            os,
            name,
            target,
        } = action;
        let target = target
            .or_else(|| self.config.default_target.clone())
            .ok_or(DispatchError::NoTarget)?;

        let id = JobId::new_random();
        let request = LaunchRequest {
            target,
            callback_url: self.config.callback_url(id),
            os,
            name: name.clone(),
        };

        // Recorded before launching: a fast runner may connect before launch() returns.
        self.table.insert_pending(
            id,
            PendingJob {
                program,
                on_failure,
                name,
                queued_at: Instant::now(),
            },
        );

        if let Err(e) = self.launcher.launch(&request).await {
            self.table.take_pending(id);
            warn!(job = %id, target = %request.target, error = %e, "Failed to dispatch runner");
            return Err(DispatchError::Launch(e));
        }

        info!(job = %id, target = %request.target, "Runner dispatched");
        self.spawn_expiry(id);
        Ok(id)
    }

    /// Abandons the job if its runner has not connected within the TTL.
    fn spawn_expiry(&self, id: JobId) {
        let table = Arc::clone(&self.table);
        let ttl = self.config.pending_ttl;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    let Some(job) = table.take_pending(id) else {
                        return;
                    };
                    warn!(job = %id, ttl = ?ttl, "Runner never connected, abandoning job");
                    let message = format!("runner for job {id} did not connect within {ttl:?}");
                    let handlers = tokio::task::spawn_blocking(move || {
                        job.on_failure.invoke(None, &message);
                    });
                    if handlers.await.is_err() {
                        warn!(job = %id, "Failure handlers for abandoned job did not complete");
                    }
                }
            }
        });
    }

    /// Promotes a Pending job to Running and starts its worker.
    ///
    /// Each id can be promoted at most once; every later attempt fails with
    /// [`ConnectError::UnknownJob`] and starts nothing.
    #[instrument(skip(self))]
    pub fn connect(&self, id: JobId) -> Result<Connection, ConnectError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectError::ShuttingDown);
        }
        let job = self
            .table
            .take_pending(id)
            .ok_or(ConnectError::UnknownJob(id))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(ReplySlot::new());
        let cancel = self.shutdown.child_token();
        self.table.insert_running(
            id,
            RunningJob {
                slot: Arc::clone(&slot),
                cancel: cancel.clone(),
                started_at: Instant::now(),
            },
        );

        info!(
            job = %id,
            name = job.name.as_deref().unwrap_or(""),
            waited = ?job.queued_at.elapsed(),
            "Runner connected, starting job"
        );
        let runner = ActionRunner::new(id, tx, slot, cancel.clone(), Arc::clone(&self.table));
        let worker =
            tokio::task::spawn_blocking(move || execute(runner, job.program, job.on_failure));

        Ok(Connection {
            job: id,
            outbound: rx,
            worker,
            cancel,
        })
    }

    /// Routes one inbound frame to the job's pending reply.
    ///
    /// Any error means the connection should be closed.
    pub fn deliver(&self, id: JobId, text: &str) -> Result<(), ProtocolViolation> {
        let job = self
            .table
            .running(id)
            .ok_or(ProtocolViolation::UnknownJob(id))?;
        let value = parse_frame(text).map_err(ProtocolViolation::MalformedFrame)?;
        job.slot.deliver(value)
    }

    /// Records that the job's connection is gone. If the job was still
    /// running, its worker is cancelled and released.
    pub fn disconnected(&self, id: JobId) {
        if self.table.close(id, true) {
            warn!(job = %id, "Runner disconnected while job was running");
        } else {
            debug!(job = %id, "Runner connection closed");
        }
    }

    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.table.state(id)
    }

    pub fn pending_count(&self) -> usize {
        self.table.pending_count()
    }

    pub fn running_count(&self) -> usize {
        self.table.running_count()
    }

    /// Stops accepting work, releases running workers and drops pending jobs.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let dropped = self.table.close_all(TransportError::Cancelled);
        info!(dropped_pending = dropped, "Runner registry shut down");
    }
}
