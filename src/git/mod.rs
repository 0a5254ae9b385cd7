//! Local git operations for disposable bot checkouts.
//!
//! This module backs the workspace orchestrator:
//! - Subprocess helpers with a clean, non-interactive git environment
//! - Path-safety checks for caller-supplied paths ([`safety`])
//! - Throwaway checkouts with guaranteed cleanup ([`workspace`])
//! - Push operations with credentials passed per command ([`push`])
//!
//! Credentials never touch `.git/config`: the installation token is handed
//! to each network command as an HTTP header through `GIT_CONFIG_*` variables.

pub mod credentials;
pub mod push;
pub mod safety;
pub mod workspace;

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

pub use credentials::BotCredentials;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Push was rejected (non-fast-forward).
    #[error("push rejected: {details}")]
    PushRejected { details: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Identity used for creating commits.
///
/// This is passed via `-c` flags to git commands, so commits can be created
/// even though global and system git config are disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// The committer/author name (git `user.name`).
    pub name: String,

    /// The committer/author email (git `user.email`).
    pub email: String,

    /// GPG signing key ID. If present, commits are signed with `-S`.
    pub signing_key: Option<String>,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        CommitIdentity {
            name: name.into(),
            email: email.into(),
            signing_key: None,
        }
    }

    /// `Name <email>`, as accepted by `git commit --author`.
    pub fn author_string(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration (e.g., rerere, hooks, aliases).
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    // Disable system and user config for reproducible behavior
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");

    // Disable terminal prompts
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Create a git Command that authenticates HTTP remotes with `credentials`.
///
/// The token travels as an `Authorization` header set through the
/// `GIT_CONFIG_*` environment (git 2.31+). It is never written to the
/// repository's config and never appears on the command line, where other
/// local users could read it from the process list.
pub(crate) fn git_authed_command(workdir: &Path, credentials: &BotCredentials) -> Command {
    let mut cmd = git_command(workdir);
    let basic = STANDARD.encode(format!("{}:{}", credentials.username, credentials.token));
    cmd.env("GIT_CONFIG_COUNT", "1");
    cmd.env("GIT_CONFIG_KEY_0", "http.extraHeader");
    cmd.env("GIT_CONFIG_VALUE_0", format!("AUTHORIZATION: basic {basic}"));
    cmd
}

/// Create a git Command configured for commit operations.
///
/// The returned command has these `-c` flags prepended:
/// - `-c user.name=<name>`
/// - `-c user.email=<email>`
/// - If `identity.signing_key` is Some: `-c user.signingkey=<key>`
pub(crate) fn git_commit_command(workdir: &Path, identity: &CommitIdentity) -> Command {
    let mut cmd = git_command(workdir);

    cmd.arg("-c");
    cmd.arg(format!("user.name={}", identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", identity.email));

    if let Some(ref key) = identity.signing_key {
        cmd.arg("-c");
        cmd.arg(format!("user.signingkey={}", key));
    }

    cmd
}

/// Runs a prepared command, mapping a non-zero exit to [`GitError::CommandFailed`].
///
/// `display` is used in the error instead of the real arguments.
pub(crate) fn run_prepared(mut cmd: Command, display: &str) -> GitResult<Output> {
    let output = cmd.output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: display.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let mut cmd = git_command(workdir);
    cmd.args(args);
    run_prepared(cmd, &format!("git {}", args.join(" ")))
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a git command with `input` on stdin.
pub fn run_git_with_input(workdir: &Path, args: &[&str], input: &[u8]) -> GitResult<Output> {
    let mut child = git_command(workdir)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    let output = child.wait_with_output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Get the SHA of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<String> {
    run_git_stdout(workdir, &["rev-parse", rev])
}
