//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::dispatch::{DEFAULT_PENDING_TTL, RegistryConfig, WorkflowTarget};
use crate::git::workspace::WorkspaceConfig;

pub const BIND_VAR: &str = "ACTION_RUNNER_BIND";
pub const PUBLIC_URL_VAR: &str = "ACTION_RUNNER_PUBLIC_URL";
pub const REPOSITORY_VAR: &str = "ACTION_RUNNER_REPOSITORY";
pub const WORKFLOW_VAR: &str = "ACTION_RUNNER_WORKFLOW";
pub const PENDING_TTL_VAR: &str = "ACTION_RUNNER_PENDING_TTL_SECS";
pub const CHECKOUT_DIR_VAR: &str = "ACTION_RUNNER_CHECKOUT_DIR";
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Everything the server binary needs.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Externally reachable `ws://` or `wss://` base, without trailing slash.
    pub public_url: String,
    pub default_target: Option<WorkflowTarget>,
    pub pending_ttl: Duration,
    pub checkout_dir: PathBuf,
    pub github_token: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("public_url", &self.public_url)
            .field("default_target", &self.default_target)
            .field("pending_ttl", &self.pending_ttl)
            .field("checkout_dir", &self.checkout_dir)
            .field("github_token", &"<redacted>")
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let bind_raw = get(BIND_VAR).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            var: BIND_VAR,
            reason: e.to_string(),
        })?;

        let public_url = get(PUBLIC_URL_VAR).ok_or(ConfigError::Missing(PUBLIC_URL_VAR))?;
        if !(public_url.starts_with("ws://") || public_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                var: PUBLIC_URL_VAR,
                reason: format!("{public_url:?} is not a ws:// or wss:// URL"),
            });
        }
        let public_url = public_url.trim_end_matches('/').to_string();

        let default_target = match (get(REPOSITORY_VAR), get(WORKFLOW_VAR)) {
            (Some(repo), Some(workflow)) => Some(WorkflowTarget::parse(&repo, &workflow).map_err(|e| {
                ConfigError::Invalid {
                    var: WORKFLOW_VAR,
                    reason: e.to_string(),
                }
            })?),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(WORKFLOW_VAR)),
            (None, Some(_)) => return Err(ConfigError::Missing(REPOSITORY_VAR)),
        };

        let pending_ttl = match get(PENDING_TTL_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: PENDING_TTL_VAR,
                        reason: format!("{raw:?} is not a positive number of seconds"),
                    });
                }
            },
            None => DEFAULT_PENDING_TTL,
        };

        let checkout_dir = get(CHECKOUT_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| WorkspaceConfig::default().base_dir);

        let github_token = get(GITHUB_TOKEN_VAR).ok_or(ConfigError::Missing(GITHUB_TOKEN_VAR))?;

        Ok(ServerConfig {
            bind,
            public_url,
            default_target,
            pending_ttl,
            checkout_dir,
            github_token,
        })
    }

    /// `<public_url>/runner/<id>/ws`
    pub fn callback_url_template(&self) -> String {
        format!("{}/runner/{}/ws", self.public_url, RegistryConfig::ID_PLACEHOLDER)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let config = RegistryConfig::new(self.callback_url_template()).with_pending_ttl(self.pending_ttl);
        match &self.default_target {
            Some(target) => config.with_default_target(target.clone()),
            None => config,
        }
    }

    pub fn workspace_config(&self) -> WorkspaceConfig {
        WorkspaceConfig::new(&self.checkout_dir)
    }
}
