//! The seam to the external compute platform.
//!
//! Starting a runner is a single fire-and-forget call: the platform is told
//! where to connect back to, and the registry waits for that connection.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{InvalidRepoId, RepoId};

/// Operating system the runner should run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerOs {
    #[default]
    Ubuntu,
    Windows,
    Macos,
}

impl RunnerOs {
    /// The hosted-runner label passed to the workflow.
    pub fn label(self) -> &'static str {
        match self {
            RunnerOs::Ubuntu => "ubuntu-latest",
            RunnerOs::Windows => "windows-latest",
            RunnerOs::Macos => "macos-latest",
        }
    }
}

impl fmt::Display for RunnerOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTarget {
    #[error(transparent)]
    Repository(#[from] InvalidRepoId),

    #[error("invalid workflow reference {0:?}, expected <file>@<ref>")]
    Workflow(String),
}

/// The workflow that hosts runners: `repository` + `workflow@git_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowTarget {
    pub repository: RepoId,
    /// Workflow file name, e.g. `runner.yml`.
    pub workflow: String,
    pub git_ref: String,
}

impl WorkflowTarget {
    pub fn new(repository: RepoId, workflow: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            repository,
            workflow: workflow.into(),
            git_ref: git_ref.into(),
        }
    }

    /// Parses a repository name and a `file.yml@ref` workflow reference.
    pub fn parse(repository: &str, workflow_ref: &str) -> Result<Self, InvalidTarget> {
        let repository = RepoId::parse(repository)?;
        match workflow_ref.rsplit_once('@') {
            Some((workflow, git_ref)) if !workflow.is_empty() && !git_ref.is_empty() => {
                Ok(Self::new(repository, workflow, git_ref))
            }
            _ => Err(InvalidTarget::Workflow(workflow_ref.to_string())),
        }
    }
}

impl fmt::Display for WorkflowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.repository, self.workflow, self.git_ref)
    }
}

/// Everything the platform needs to start one runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub target: WorkflowTarget,
    /// Address the runner connects back to; names the job id.
    pub callback_url: String,
    pub os: RunnerOs,
    /// Optional human-readable run name.
    pub name: Option<String>,
}

/// Starts remote compute for a job.
///
/// # Example
///
/// ```ignore
/// struct NoopLauncher;
///
/// impl JobLauncher for NoopLauncher {
///     type Error = std::convert::Infallible;
///
///     async fn launch(&self, request: &LaunchRequest) -> Result<(), Self::Error> {
///         println!("would start a runner for {}", request.callback_url);
///         Ok(())
///     }
/// }
/// ```
pub trait JobLauncher: Send + Sync + 'static {
    /// The error type returned when the platform refuses the launch.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Asks the platform to start a runner. Returns once the request is
    /// accepted, not once the runner is up.
    fn launch(&self, request: &LaunchRequest)
    -> impl Future<Output = Result<(), Self::Error>> + Send;
}
