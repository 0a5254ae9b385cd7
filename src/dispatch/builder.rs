//! Consuming builder for queued actions.
//!
//! Each method takes the builder by value, so a partially built action can
//! never be shared and mutated from two places.

use crate::runner::{ActionProgram, ActionResult, ActionRunner, FailureHandlers};
use crate::types::JobId;

use super::launcher::{JobLauncher, RunnerOs, WorkflowTarget};
use super::registry::{DispatchError, Registry};

/// A fully built action, ready for [`Registry::queue`].
#[derive(Debug, Default)]
pub struct QueuedAction {
    pub(crate) program: ActionProgram,
    pub(crate) on_failure: FailureHandlers,
    pub(crate) os: RunnerOs,
    pub(crate) name: Option<String>,
    pub(crate) target: Option<WorkflowTarget>,
}

impl QueuedAction {
    pub fn builder() -> ActionBuilder {
        ActionBuilder::new()
    }

    pub fn program(&self) -> &ActionProgram {
        &self.program
    }

    pub fn failure_handlers(&self) -> &FailureHandlers {
        &self.on_failure
    }

    pub fn os(&self) -> RunnerOs {
        self.os
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn target(&self) -> Option<&WorkflowTarget> {
        self.target.as_ref()
    }
}

/// Accumulates steps and failure handlers for one remote job.
///
/// # Example
///
/// ```ignore
/// let id = ActionBuilder::new()
///     .name("Format PR #12")
///     .run(|r| r.clone_ref(&url, "origin", "refs/pull/12/head"))
///     .run(|r| r.run_caching_gradle(&repo, 12, |r| r.gradle(&["applyFormatting"]).map(|_| ())))
///     .run(move |r| {
///         let patch = r.diff(None)?;
///         sink.send(patch).ok();
///         Ok(())
///     })
///     .on_failure(|runner, message| report(runner.and_then(|r| r.run_url()), message))
///     .queue(&registry)
///     .await?;
/// ```
#[derive(Debug, Default)]
#[must_use = "an action does nothing until it is queued"]
pub struct ActionBuilder {
    action: QueuedAction,
}

impl ActionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn os(mut self, os: RunnerOs) -> Self {
        self.action.os = os;
        self
    }

    /// Human-readable run name passed to the workflow.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.action.name = Some(name.into());
        self
    }

    /// Dispatches to `target` instead of the registry's default workflow.
    pub fn target(mut self, target: WorkflowTarget) -> Self {
        self.action.target = Some(target);
        self
    }

    /// Appends a step; steps run in the order they were added.
    pub fn run(
        mut self,
        step: impl FnOnce(&mut ActionRunner) -> ActionResult<()> + Send + 'static,
    ) -> Self {
        self.action.program = self.action.program.step(step);
        self
    }

    /// Appends every step of `program`.
    pub fn then(mut self, program: ActionProgram) -> Self {
        self.action.program = self.action.program.and_then(program);
        self
    }

    /// Adds a failure handler; all handlers run, in the order they were added.
    pub fn on_failure(
        mut self,
        handler: impl FnOnce(Option<&mut ActionRunner>, &str) + Send + 'static,
    ) -> Self {
        self.action.on_failure = self.action.on_failure.push(handler);
        self
    }

    pub fn build(self) -> QueuedAction {
        self.action
    }

    /// Builds the action and queues it on `registry`.
    pub async fn queue<L: JobLauncher>(
        self,
        registry: &Registry<L>,
    ) -> Result<JobId, DispatchError<L::Error>> {
        registry.queue(self.build()).await
    }
}
