//! The per-job RPC channel to a remote runner.
//!
//! An [`ActionRunner`] is owned by exactly one job worker. Every verb sends a
//! single request and blocks the worker until the matching reply arrives:
//! there is never more than one request in flight, and the next inbound frame
//! is by construction the reply to the last request sent.
//!
//! The worker runs on a blocking thread, while the connection itself is
//! serviced by an async socket task. The two meet in two places:
//!
//! - outbound frames go through an unbounded channel of [`Outbound`] values
//! - inbound replies resolve the shared [`ReplySlot`]
//!
//! Verbs fail with a typed [`ActionError`]. A failed remote command
//! ([`ActionError::RemoteExecution`]) is recoverable; callers may match on it
//! and carry on.

pub mod cache;
pub mod error;
pub mod program;
pub mod slot;
pub mod toolchain;

use std::pin::pin;
use std::sync::Arc;

use axum::extract::ws::close_code;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::{self, Either};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::tokenize;
use crate::dispatch::JobTable;
use crate::protocol::{
    Ack, BackgroundCommandReply, CommandReply, DetailsReply, EvalReply, ReadFileReply, Request,
};
use crate::types::{JobId, RunId};

pub use error::{ActionError, ActionResult, ProtocolViolation, TransportError};
pub use program::{ActionProgram, FailureHandlers, Step};
pub use slot::ReplySlot;

/// A frame the job worker wants written to its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: &'static str },
}

/// Facts about the remote side, learned from the `details` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerContext {
    /// `owner/repo` of the repository hosting the workflow.
    pub repository: String,
    pub run_id: RunId,
    pub user_home: String,
}

impl RunnerContext {
    /// Resolves `path` against the runner's home directory.
    pub fn resolve_home(&self, path: &str) -> String {
        let home = self.user_home.trim_end_matches('/');
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{home}/{path}")
    }

    /// Link to the workflow run on GitHub.
    pub fn run_url(&self) -> String {
        format!(
            "https://github.com/{}/actions/runs/{}",
            self.repository, self.run_id
        )
    }
}

/// RPC channel for one running job.
pub struct ActionRunner {
    job: JobId,
    outbound: mpsc::UnboundedSender<Outbound>,
    slot: Arc<ReplySlot>,
    cancel: CancellationToken,
    table: Arc<JobTable>,
    context: Option<RunnerContext>,
    closed: bool,
}

impl ActionRunner {
    pub(crate) fn new(
        job: JobId,
        outbound: mpsc::UnboundedSender<Outbound>,
        slot: Arc<ReplySlot>,
        cancel: CancellationToken,
        table: Arc<JobTable>,
    ) -> Self {
        Self {
            job,
            outbound,
            slot,
            cancel,
            table,
            context: None,
            closed: false,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job
    }

    /// Handshake context; `None` until [`ActionRunner::request_details`] succeeds.
    pub fn context(&self) -> Option<&RunnerContext> {
        self.context.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends one request and blocks until its reply arrives.
    ///
    /// Must be called from a blocking thread, never from inside an async task.
    fn send_and_expect<R: DeserializeOwned>(&mut self, request: Request) -> ActionResult<R> {
        let verb = request.kind();
        if self.closed {
            return Err(TransportError::Stopped.into());
        }
        if self.cancel.is_cancelled() {
            return Err(self
                .slot
                .closed_reason()
                .unwrap_or(TransportError::Cancelled)
                .into());
        }
        if self.context.is_none() && !matches!(request, Request::Details) {
            return Err(ProtocolViolation::HandshakeRequired { verb }.into());
        }

        let frame = request
            .to_frame()
            .map_err(|e| ProtocolViolation::MalformedFrame(e.to_string()))?;
        let reply = self.slot.arm(verb)?;
        if self.outbound.send(Outbound::Text(frame)).is_err() {
            self.slot.disarm();
            return Err(TransportError::ConnectionClosed.into());
        }
        debug!(job = %self.job, verb, "sent request");

        let Some(value) = self.wait_for_reply(reply) else {
            // Keeps an earlier reason (cancellation, shutdown) if there is one.
            self.slot.close(TransportError::ConnectionClosed);
            return Err(self
                .slot
                .closed_reason()
                .unwrap_or(TransportError::ConnectionClosed)
                .into());
        };
        serde_json::from_value(value).map_err(|e| {
            ProtocolViolation::MalformedReply {
                verb,
                detail: e.to_string(),
            }
            .into()
        })
    }

    /// Blocks until the reply arrives, the slot is closed, or the socket task
    /// drops its end of the outbound channel.
    fn wait_for_reply(&self, reply: oneshot::Receiver<Value>) -> Option<Value> {
        let outbound = self.outbound.clone();
        futures::executor::block_on(async move {
            let gone = pin!(outbound.closed());
            match future::select(reply, gone).await {
                Either::Left((Ok(value), _)) => Some(value),
                Either::Left((Err(_), _)) | Either::Right(_) => None,
            }
        })
    }

    // ─── Lifecycle ───

    /// Performs the mandatory `details` handshake.
    pub fn request_details(&mut self) -> ActionResult<&RunnerContext> {
        let reply: DetailsReply = self.send_and_expect(Request::Details)?;
        info!(
            job = %self.job,
            repository = %reply.repository,
            run_id = reply.id,
            "runner connected"
        );
        Ok(&*self.context.insert(RunnerContext {
            repository: reply.repository,
            run_id: RunId(reply.id),
            user_home: reply.user_home,
        }))
    }

    /// Closes the connection normally. Later verbs fail with [`TransportError::Stopped`].
    pub fn stop(&mut self) {
        self.shut(close_code::NORMAL, "actions executed");
    }

    /// Closes the connection after a failure.
    pub(crate) fn abort(&mut self) {
        self.shut(close_code::ERROR, "caught error");
    }

    fn shut(&mut self, code: u16, reason: &'static str) {
        if self.closed {
            return;
        }
        self.closed = true;
        // The socket may already be gone; the close frame is then moot.
        let _ = self.outbound.send(Outbound::Close { code, reason });
        self.slot.close(TransportError::Stopped);
        self.table.close(self.job, false);
        debug!(job = %self.job, code, reason, "runner channel closed");
    }

    // ─── Commands ───

    /// Runs `argv` on the runner and returns its stdout.
    pub fn exec<S: AsRef<str>>(&mut self, argv: &[S]) -> ActionResult<String> {
        let command: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        let joined = command.join(" ");
        let reply: CommandReply = self.send_and_expect(Request::Command { command })?;
        match reply.into_result() {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(detail)) => Err(ActionError::RemoteExecution {
                command: joined,
                detail,
            }),
            None => Err(ProtocolViolation::MalformedReply {
                verb: "command",
                detail: "reply has neither stdout nor stderr".into(),
            }
            .into()),
        }
    }

    /// Tokenizes a shell-like line and runs it.
    pub fn exec_line(&mut self, line: &str) -> ActionResult<String> {
        let argv = tokenize(line);
        if argv.is_empty() {
            return Err(ActionError::failed(format!("empty command line {line:?}")));
        }
        self.exec(&argv)
    }

    pub fn git<S: AsRef<str>>(&mut self, args: &[S]) -> ActionResult<String> {
        self.exec(&prefixed("git", args))
    }

    pub fn gradle<S: AsRef<str>>(&mut self, args: &[S]) -> ActionResult<String> {
        self.exec(&prefixed("./gradlew", args))
    }

    /// Fetches `git_ref` from `url` into the runner's current repository and
    /// checks it out (as local branch `temp`), tags included.
    pub fn clone_ref(&mut self, url: &str, remote: &str, git_ref: &str) -> ActionResult<()> {
        let refspec = format!("{git_ref}:temp");
        self.git(&["remote", "add", remote, url])?;
        self.git(&["fetch", remote, refspec.as_str()])?;
        self.git(&["fetch", remote, "--tags"])?;
        self.git(&["checkout", "temp"])?;
        Ok(())
    }

    /// Stages everything and returns the staged diff, optionally limited to a pathspec.
    pub fn diff(&mut self, pathspec: Option<&str>) -> ActionResult<String> {
        self.git(&["add", "."])?;
        match pathspec.map(str::trim).filter(|p| !p.is_empty()) {
            Some(pattern) => {
                let pathspec = format!(":{pattern}");
                self.git(&["diff", "--cached", pathspec.as_str()])
            }
            None => self.git(&["diff", "--cached"]),
        }
    }

    /// Starts `argv` under `id` and returns whatever output the runner
    /// collected before replying.
    pub fn background_exec<S: AsRef<str>>(&mut self, id: &str, argv: &[S]) -> ActionResult<String> {
        let command = argv.iter().map(|s| s.as_ref().to_string()).collect();
        let reply: BackgroundCommandReply = self.send_and_expect(Request::BackgroundCommand {
            id: id.to_string(),
            command,
        })?;
        Ok(reply.output)
    }

    /// Evaluates a boolean expression on the runner.
    pub fn eval(&mut self, expression: &str, variables: Map<String, Value>) -> ActionResult<bool> {
        let reply: EvalReply = self.send_and_expect(Request::Eval {
            expression: expression.to_string(),
            variables,
        })?;
        Ok(reply.result)
    }

    // ─── Files and environment ───

    pub fn write_file(&mut self, path: &str, content: &str) -> ActionResult<()> {
        let Ack = self.send_and_expect(Request::WriteFile {
            path: path.to_string(),
            content: content.to_string(),
        })?;
        Ok(())
    }

    /// Reads a file from the runner; `None` when it does not exist.
    pub fn read_file(&mut self, path: &str) -> ActionResult<Option<Vec<u8>>> {
        let reply: ReadFileReply = self.send_and_expect(Request::ReadFile {
            path: path.to_string(),
        })?;
        reply
            .file
            .map(|encoded| {
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| ProtocolViolation::MalformedReply {
                        verb: "read-file",
                        detail: e.to_string(),
                    })
            })
            .transpose()
            .map_err(Into::into)
    }

    /// Reads an environment variable on the runner; `None` when unset.
    pub fn get_env_var(&mut self, name: &str) -> ActionResult<Option<String>> {
        match self.exec(&["printenv", name]) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(ActionError::RemoteExecution { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sets an environment variable for subsequent commands on the runner.
    pub fn set_env_var(&mut self, name: &str, value: &str) -> ActionResult<()> {
        let Ack = self.send_and_expect(Request::SetEnv {
            name: name.to_string(),
            value: value.to_string(),
        })?;
        Ok(())
    }

    // ─── Progress reporting ───

    pub fn log(&mut self, message: &str) -> ActionResult<()> {
        let Ack = self.send_and_expect(Request::Log {
            message: message.to_string(),
        })?;
        Ok(())
    }

    pub fn push_group(&mut self, title: &str) -> ActionResult<()> {
        let Ack = self.send_and_expect(Request::Group {
            title: Some(title.to_string()),
        })?;
        Ok(())
    }

    pub fn pop_group(&mut self) -> ActionResult<()> {
        let Ack = self.send_and_expect(Request::Group { title: None })?;
        Ok(())
    }

    /// Runs `f` inside a log group. The group is closed even when `f` fails;
    /// `f`'s error takes precedence over a failure to close the group.
    pub fn group<T>(
        &mut self,
        title: &str,
        f: impl FnOnce(&mut Self) -> ActionResult<T>,
    ) -> ActionResult<T> {
        self.push_group(title)?;
        let result = f(self);
        let popped = self.pop_group();
        let value = result?;
        popped?;
        Ok(value)
    }

    // ─── Context ───

    /// Resolves `path` against the runner's home directory.
    pub fn resolve_home(&self, path: &str) -> ActionResult<String> {
        self.context
            .as_ref()
            .map(|ctx| ctx.resolve_home(path))
            .ok_or_else(|| {
                ProtocolViolation::HandshakeRequired {
                    verb: "resolve-home",
                }
                .into()
            })
    }

    /// Link to the workflow run hosting this job, once the handshake is done.
    pub fn run_url(&self) -> Option<String> {
        self.context.as_ref().map(RunnerContext::run_url)
    }
}

fn prefixed<S: AsRef<str>>(program: &str, args: &[S]) -> Vec<String> {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|s| s.as_ref().to_string()))
        .collect()
}
