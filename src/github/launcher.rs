//! Starting runners through GitHub Actions `workflow_dispatch`.

use octocrab::Octocrab;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::dispatch::{JobLauncher, LaunchRequest};

use super::error::GitHubApiError;

/// Launches runners by dispatching the configured workflow.
///
/// The workflow receives `endpoint` (the callback address), `os` (the
/// hosted-runner label) and, when set, `name`. A refused dispatch is
/// reported once; callers re-queue if they want another attempt.
#[derive(Clone)]
pub struct WorkflowLauncher {
    client: Octocrab,
}

impl WorkflowLauncher {
    /// `client` should come from [`build_client`](super::build_client); a
    /// client with octocrab's default retries may dispatch a job twice.
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Octocrab {
        &self.client
    }
}

impl std::fmt::Debug for WorkflowLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowLauncher").finish_non_exhaustive()
    }
}

/// The `inputs` object sent with the dispatch.
pub fn dispatch_inputs(request: &LaunchRequest) -> Value {
    let mut inputs = Map::new();
    inputs.insert("endpoint".into(), json!(request.callback_url));
    inputs.insert("os".into(), json!(request.os.label()));
    if let Some(name) = &request.name {
        inputs.insert("name".into(), json!(name));
    }
    Value::Object(inputs)
}

impl JobLauncher for WorkflowLauncher {
    type Error = GitHubApiError;

    async fn launch(&self, request: &LaunchRequest) -> Result<(), Self::Error> {
        let target = &request.target;
        self.client
            .actions()
            .create_workflow_dispatch(
                &target.repository.owner,
                &target.repository.repo,
                &target.workflow,
                &target.git_ref,
            )
            .inputs(dispatch_inputs(request))
            .send()
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        info!(target = %target, os = %request.os, "Dispatched runner workflow");
        Ok(())
    }
}
