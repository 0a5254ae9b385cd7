//! Error taxonomy for runner conversations.
//!
//! Callers pattern-match on [`ActionError`] rather than inspecting messages:
//! a failed remote command ([`ActionError::RemoteExecution`]) is ordinary,
//! recoverable control flow, while transport failures and protocol
//! violations mean the connection is unusable.

use thiserror::Error;

use crate::git::GitError;
use crate::git::workspace::WorkspaceError;
use crate::types::JobId;

/// The connection to the runner is gone or was never usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote closed the connection (or it dropped) mid-session.
    #[error("runner connection closed")]
    ConnectionClosed,

    /// The job was cancelled, e.g. by server shutdown.
    #[error("job cancelled")]
    Cancelled,

    /// The channel was already stopped by the program itself.
    #[error("runner channel already stopped")]
    Stopped,
}

/// The remote (or the program driving it) broke the turn-taking protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("message for unknown job {0}")]
    UnknownJob(JobId),

    #[error("message received while no request was outstanding")]
    UnsolicitedMessage,

    #[error("cannot send {attempted} while a reply to {pending} is outstanding")]
    RequestInFlight {
        pending: &'static str,
        attempted: &'static str,
    },

    #[error("{verb} sent before the details handshake completed")]
    HandshakeRequired { verb: &'static str },

    #[error("malformed reply to {verb}: {detail}")]
    MalformedReply { verb: &'static str, detail: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Any failure raised by a step of an action program.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The runner executed the command and reported an error.
    #[error("Command '{command}' failed execution with error: {detail}")]
    RemoteExecution { command: String, detail: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// A step panicked; the payload message is kept.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// A step failed for a program-specific reason.
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed(message.into())
    }

    /// True for failures reported by a remote command, which callers may
    /// choose to tolerate (e.g. `git apply --reject`).
    pub fn is_remote_execution(&self) -> bool {
        matches!(self, ActionError::RemoteExecution { .. })
    }

    /// True when the connection can no longer carry requests.
    pub fn is_transport(&self) -> bool {
        matches!(self, ActionError::Transport(_))
    }
}

pub type ActionResult<T> = Result<T, ActionError>;
