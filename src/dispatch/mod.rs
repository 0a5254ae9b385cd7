//! Job dispatch and connection routing.
//!
//! An action is built with [`ActionBuilder`] and queued on the [`Registry`],
//! which asks a [`JobLauncher`] to start a runner and records the job as
//! Pending under a fresh [`JobId`](crate::types::JobId). When the runner
//! connects, the registry promotes the job to Running and executes its program
//! on a dedicated blocking worker.
//!
//! Jobs never share state beyond the [`JobTable`]; each worker owns its
//! channel, context and reply slot.

pub mod builder;
pub mod job;
pub mod launcher;
pub mod registry;
pub mod table;

pub use builder::{ActionBuilder, QueuedAction};
pub use job::JobOutcome;
pub use launcher::{InvalidTarget, JobLauncher, LaunchRequest, RunnerOs, WorkflowTarget};
pub use registry::{
    Connection, ConnectError, DEFAULT_PENDING_TTL, DispatchError, Registry, RegistryConfig,
};
pub use table::{JobState, JobTable};
