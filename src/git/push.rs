//! Push operations from a bot checkout.
//!
//! Pushes always name the full destination ref (`HEAD:refs/heads/<branch>`),
//! so they work from a detached HEAD as well as from a branch.

use std::path::Path;

use super::{BotCredentials, GitError, GitResult, git_authed_command, rev_parse};

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    /// Push succeeded.
    Success {
        /// The SHA that was pushed.
        pushed_sha: String,
    },

    /// Push was rejected (non-fast-forward).
    Rejected {
        /// Details about why the push was rejected.
        details: String,
    },

    /// Push was a no-op (remote already has this commit).
    AlreadyUpToDate,
}

impl PushResult {
    /// Returns true if the push succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, PushResult::Success { .. })
    }

    /// Returns true if the push was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, PushResult::Rejected { .. })
    }

    /// Turns a rejection into [`GitError::PushRejected`].
    pub fn into_result(self) -> GitResult<Self> {
        match self {
            PushResult::Rejected { details } => Err(GitError::PushRejected { details }),
            other => Ok(other),
        }
    }
}

/// Push the current HEAD to `branch` on `origin`.
///
/// A `force` push replaces whatever the branch pointed to (used for bot-owned
/// branches such as backports, which are regenerated from scratch).
pub fn push_head_to_branch(
    worktree: &Path,
    branch: &str,
    force: bool,
    credentials: &BotCredentials,
) -> GitResult<PushResult> {
    let refspec = format!("HEAD:refs/heads/{}", branch);
    let head_sha = rev_parse(worktree, "HEAD")?;

    let mut args = vec!["push", "origin"];
    if force {
        args.push("--force");
    }
    args.push(&refspec);

    let output = git_authed_command(worktree, credentials)
        .args(&args)
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        if stdout.contains("Everything up-to-date") || stderr.contains("Everything up-to-date") {
            return Ok(PushResult::AlreadyUpToDate);
        }
        return Ok(PushResult::Success {
            pushed_sha: head_sha,
        });
    }

    if stderr.contains("non-fast-forward")
        || stderr.contains("rejected")
        || stderr.contains("failed to push")
    {
        return Ok(PushResult::Rejected {
            details: stderr.to_string(),
        });
    }

    Err(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: stderr.to_string(),
    })
}

/// Push a tag to `origin`.
pub fn push_tag(worktree: &Path, tag: &str, credentials: &BotCredentials) -> GitResult<()> {
    let refspec = format!("refs/tags/{tag}:refs/tags/{tag}");
    let mut cmd = git_authed_command(worktree, credentials);
    cmd.args(["push", "origin", &refspec]);
    super::run_prepared(cmd, &format!("git push origin {refspec}"))?;
    Ok(())
}

/// Get the SHA `branch` points to on `origin`, if it exists.
pub fn get_remote_ref(
    worktree: &Path,
    branch: &str,
    credentials: &BotCredentials,
) -> GitResult<Option<String>> {
    let pattern = format!("refs/heads/{}", branch);
    let mut cmd = git_authed_command(worktree, credentials);
    cmd.args(["ls-remote", "origin", &pattern]);
    let output = super::run_prepared(cmd, &format!("git ls-remote origin {pattern}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .find_map(|line| line.split_whitespace().next())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::workspace::test_support::{bare_origin, commit_file, test_credentials};
    use crate::git::run_git_sync;
    use tempfile::TempDir;

    fn clone_of(origin: &Path) -> TempDir {
        let dir = TempDir::new().unwrap();
        run_git_sync(
            dir.path(),
            &["clone", "--branch", "main", origin.to_str().unwrap(), "."],
        )
        .unwrap();
        dir
    }

    #[test]
    fn push_creates_branch() {
        let (_origin_dir, origin) = bare_origin();
        let clone = clone_of(&origin);
        let creds = test_credentials();
        commit_file(clone.path(), "new.txt", "new content");

        let result = push_head_to_branch(clone.path(), "feature-1", false, &creds).unwrap();
        assert!(result.is_success());

        let remote = get_remote_ref(clone.path(), "feature-1", &creds).unwrap();
        assert_eq!(remote, Some(rev_parse(clone.path(), "HEAD").unwrap()));
    }

    #[test]
    fn diverged_push_is_rejected_unless_forced() {
        let (_origin_dir, origin) = bare_origin();
        let creds = test_credentials();

        let first = clone_of(&origin);
        commit_file(first.path(), "a.txt", "a");
        push_head_to_branch(first.path(), "backport", false, &creds).unwrap();

        let second = clone_of(&origin);
        commit_file(second.path(), "b.txt", "b");
        let rejected = push_head_to_branch(second.path(), "backport", false, &creds).unwrap();
        assert!(rejected.is_rejected());
        assert!(matches!(
            rejected.into_result(),
            Err(GitError::PushRejected { .. })
        ));

        let forced = push_head_to_branch(second.path(), "backport", true, &creds).unwrap();
        assert!(forced.is_success());
        assert_eq!(
            get_remote_ref(second.path(), "backport", &creds).unwrap(),
            Some(rev_parse(second.path(), "HEAD").unwrap())
        );
    }

    #[test]
    fn missing_remote_branch_is_none() {
        let (_origin_dir, origin) = bare_origin();
        let clone = clone_of(&origin);
        assert_eq!(
            get_remote_ref(clone.path(), "nope", &test_credentials()).unwrap(),
            None
        );
    }

    #[test]
    fn tags_are_pushed() {
        let (_origin_dir, origin) = bare_origin();
        let clone = clone_of(&origin);
        run_git_sync(clone.path(), &["tag", "v1.0.0"]).unwrap();
        push_tag(clone.path(), "v1.0.0", &test_credentials()).unwrap();

        let tags = crate::git::run_git_stdout(&origin, &["tag", "--list"]).unwrap();
        assert_eq!(tags, "v1.0.0");
    }
}
