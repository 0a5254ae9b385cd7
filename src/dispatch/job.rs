//! Execution of one connected job on its worker thread.

use tracing::{error, info};

use crate::runner::{ActionProgram, ActionRunner, FailureHandlers};

/// How a job's program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The first failure's message, as passed to the failure handlers.
    Failed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

/// Runs the handshake and then the program.
///
/// On success the channel is stopped normally. On the first failure the
/// failure handlers run (while the channel is still usable, if it is) and the
/// channel is then closed with an error status.
pub(crate) fn execute(
    mut runner: ActionRunner,
    program: ActionProgram,
    on_failure: FailureHandlers,
) -> JobOutcome {
    let job = runner.job_id();
    let handshake = runner.request_details().map(|_| ());
    let result = handshake.and_then(|()| program.run(&mut runner));

    match result {
        Ok(()) => {
            runner.stop();
            info!(job = %job, "action program completed");
            JobOutcome::Completed
        }
        Err(e) => {
            let message = e.to_string();
            error!(job = %job, error = %message, "action program failed");
            on_failure.invoke(Some(&mut runner), &message);
            runner.abort();
            JobOutcome::Failed(message)
        }
    }
}
