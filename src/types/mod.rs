//! Core identifier types shared across the runner protocol.
//!
//! Newtypes keep job ids, repositories and workflow run ids from being mixed up.

pub mod ids;

pub use ids::{InvalidRepoId, JobId, RepoId, RunId};
