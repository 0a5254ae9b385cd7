//! GitHub API integration via octocrab.
//!
//! - [`WorkflowLauncher`] starts runners through `workflow_dispatch`
//! - [`fetch_bot_credentials`] resolves the app's bot user for git identity
//!
//! Failures are classified as transient or permanent for the caller; nothing
//! here retries, and [`build_client`] turns off octocrab's own retries.

mod client;
mod error;
mod launcher;
mod users;

pub use client::build_client;
pub use error::{GitHubApiError, GitHubErrorKind};
pub use launcher::{WorkflowLauncher, dispatch_inputs};
pub use users::fetch_bot_credentials;
