//! Action programs: ordered steps run against one runner.
//!
//! A program is a plain list of boxed closures. Composition is concatenation,
//! and execution stops at the first failing step. Failure handlers compose the
//! same way and all run, in registration order.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error};

use super::{ActionError, ActionResult, ActionRunner, TransportError};

/// One step of a program.
pub type Step = Box<dyn FnOnce(&mut ActionRunner) -> ActionResult<()> + Send + 'static>;

/// Called with the runner (when one ever connected) and a readable failure message.
pub type FailureHandler = Box<dyn FnOnce(Option<&mut ActionRunner>, &str) + Send + 'static>;

/// An ordered sequence of steps.
#[derive(Default)]
pub struct ActionProgram {
    steps: Vec<Step>,
}

impl ActionProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    pub fn step(
        mut self,
        step: impl FnOnce(&mut ActionRunner) -> ActionResult<()> + Send + 'static,
    ) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// All of `self`'s steps, then all of `next`'s.
    pub fn and_then(mut self, next: ActionProgram) -> Self {
        self.steps.extend(next.steps);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the steps in order on the calling thread, stopping at the first failure.
    ///
    /// A panicking step is reported as [`ActionError::Panicked`]. Cancellation
    /// is checked between steps.
    pub fn run(self, runner: &mut ActionRunner) -> ActionResult<()> {
        let total = self.steps.len();
        for (index, step) in self.steps.into_iter().enumerate() {
            if runner.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
            debug!(job = %runner.job_id(), step = index + 1, total, "running step");
            catch_unwind(AssertUnwindSafe(|| step(runner)))
                .map_err(|payload| ActionError::Panicked(panic_message(payload.as_ref())))??;
        }
        Ok(())
    }
}

impl fmt::Debug for ActionProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionProgram")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// The composed failure handler of one program.
#[derive(Default)]
pub struct FailureHandlers {
    handlers: Vec<FailureHandler>,
}

impl FailureHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, handler: impl FnOnce(Option<&mut ActionRunner>, &str) + Send + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn and_then(mut self, next: FailureHandlers) -> Self {
        self.handlers.extend(next.handlers);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every handler in registration order. A panicking handler is
    /// logged and does not prevent the rest from running.
    pub fn invoke(self, mut runner: Option<&mut ActionRunner>, message: &str) {
        for handler in self.handlers {
            let runner = runner.as_deref_mut();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(runner, message))) {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "failure handler panicked"
                );
            }
        }
    }
}

impl fmt::Debug for FailureHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureHandlers")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
