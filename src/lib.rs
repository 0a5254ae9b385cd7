//! Action Runner - drives short-lived remote runners for a GitHub-App bot.
//!
//! A bot queues a program of steps; the library dispatches a workflow that
//! starts a runner, the runner connects back over a WebSocket, and the steps
//! execute one request/reply at a time against it.

pub mod commands;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod git;
pub mod github;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
