//! Build-cache bracketing around a unit of remote work.
//!
//! The runner owns the cache storage; the server only tells it when to
//! restore and when to save. Restores use a stable key prefix, saves append a
//! volatile component (usually a timestamp) so successive runs share a warm
//! start without ever overwriting each other's snapshot.

use std::fmt::Display;

use tracing::warn;

use super::{ActionResult, ActionRunner};
use crate::protocol::{Ack, Request};
use crate::types::RepoId;

pub fn restore_request<S: AsRef<str>>(key: &str, paths: &[S]) -> Request {
    Request::RestoreCache {
        key: key.to_string(),
        paths: owned(paths),
    }
}

pub fn save_request<S: AsRef<str>>(key: &str, paths: &[S]) -> Request {
    Request::SaveCache {
        key: key.to_string(),
        paths: owned(paths),
    }
}

fn owned<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    paths.iter().map(|p| p.as_ref().to_string()).collect()
}

/// Restore-key prefix for a pull request's Gradle home.
pub fn gradle_cache_prefix(repo: &RepoId, pr: u64) -> String {
    format!("gradle-pr-{repo}-{pr}-")
}

impl ActionRunner {
    pub fn save_cache<S: AsRef<str>>(&mut self, key: &str, paths: &[S]) -> ActionResult<()> {
        let Ack = self.send_and_expect(save_request(key, paths))?;
        Ok(())
    }

    pub fn restore_cache<S: AsRef<str>>(&mut self, key: &str, paths: &[S]) -> ActionResult<()> {
        let Ack = self.send_and_expect(restore_request(key, paths))?;
        Ok(())
    }

    /// Restores `path` under `key`, runs `work`, then saves `path` under
    /// `key` + `key_component`.
    ///
    /// The save happens whether or not `work` failed: a partial cache still
    /// speeds up the next run. When both fail, `work`'s error is returned.
    pub fn run_caching<T>(
        &mut self,
        key: &str,
        path: &str,
        key_component: impl Display,
        work: impl FnOnce(&mut Self) -> ActionResult<T>,
    ) -> ActionResult<T> {
        self.restore_cache(key, &[path])?;
        let result = work(self);
        let saved = self.save_cache(&format!("{key}{key_component}"), &[path]);
        match (result, saved) {
            (Ok(value), saved) => saved.map(|()| value),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(save_err)) => {
                warn!(job = %self.job_id(), key, error = %save_err, "cache save after failed work also failed");
                Err(e)
            }
        }
    }

    /// [`ActionRunner::run_caching`] over the runner's `~/.gradle/`, keyed by
    /// pull request and versioned by the current epoch second.
    pub fn run_caching_gradle<T>(
        &mut self,
        repo: &RepoId,
        pr: u64,
        work: impl FnOnce(&mut Self) -> ActionResult<T>,
    ) -> ActionResult<T> {
        let path = self.resolve_home(".gradle/")?;
        let key = gradle_cache_prefix(repo, pr);
        self.run_caching(&key, &path, chrono::Utc::now().timestamp(), work)
    }
}
