//! Disposable checkouts for bot-authored git changes.
//!
//! [`with_checkout`] clones a branch into a fresh, uniquely named directory,
//! hands the caller a [`Workspace`] for the duration of one closure, and
//! removes the directory afterwards whether the closure succeeded, failed or
//! panicked. Nothing is reused between calls.
//!
//! Directory layout under the configured base:
//!
//! ```text
//! <base>/repos/<owner>/<repo>/<uuid>/         plain branch checkouts
//! <base>/prs/<owner>/<repo>/pr<N>/<uuid>/     checkouts made on behalf of a pull request
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::diff::patch_paths;
use crate::types::RepoId;

use super::push::{PushResult, push_head_to_branch, push_tag};
use super::safety::{UnsafePath, refuse_symlinks, resolve_within};
use super::{
    BotCredentials, CommitIdentity, GitError, git_authed_command, git_commit_command,
    rev_parse, run_git_stdout, run_git_sync, run_git_with_input, run_prepared,
};

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied path was refused; nothing was written for it.
    #[error("refusing path {path:?}: {reason}")]
    UnsafePath { path: String, reason: UnsafePath },
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Configuration for checkouts.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Directory all checkouts are created under.
    pub base_dir: PathBuf,
}

impl WorkspaceConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        WorkspaceConfig {
            base_dir: base_dir.into(),
        }
    }

    /// A fresh, never-before-used directory for `target`.
    pub fn scratch_dir(&self, target: &CheckoutTarget) -> PathBuf {
        let parent = match target.pull_request {
            Some(pr) => self
                .base_dir
                .join("prs")
                .join(&target.repository.owner)
                .join(&target.repository.repo)
                .join(format!("pr{pr}")),
            None => self
                .base_dir
                .join("repos")
                .join(&target.repository.owner)
                .join(&target.repository.repo),
        };
        parent.join(Uuid::new_v4().to_string())
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::new("checkout")
    }
}

/// What to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutTarget {
    /// Repository the checkout is made for (used for the directory layout).
    pub repository: RepoId,
    pub clone_url: String,
    /// Branch to check out.
    pub branch: String,
    /// Pull request the checkout serves, if any.
    pub pull_request: Option<u64>,
}

impl CheckoutTarget {
    /// A branch of a GitHub repository.
    pub fn github(repository: RepoId, branch: impl Into<String>) -> Self {
        let clone_url = format!("https://github.com/{repository}.git");
        CheckoutTarget {
            repository,
            clone_url,
            branch: branch.into(),
            pull_request: None,
        }
    }

    /// The head branch of pull request `number` on `base`, which may live in a fork.
    pub fn pull_request(base: RepoId, number: u64, head_repo: &RepoId, head_branch: impl Into<String>) -> Self {
        CheckoutTarget {
            clone_url: format!("https://github.com/{head_repo}.git"),
            repository: base,
            branch: head_branch.into(),
            pull_request: Some(number),
        }
    }

    pub fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.clone_url = url.into();
        self
    }
}

/// Removes the directory when dropped.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> WorkspaceResult<Self> {
        fs::create_dir_all(&path)?;
        Ok(ScratchDir { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed checkout"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove checkout"),
        }
    }
}

/// Clones `target` into a fresh directory, runs `f` against it, and removes
/// the directory afterwards on every path.
///
/// `credentials` authenticate the clone and any push made through the
/// workspace; they are dropped together with the checkout.
pub fn with_checkout<T, E>(
    config: &WorkspaceConfig,
    target: &CheckoutTarget,
    credentials: BotCredentials,
    f: impl FnOnce(&Workspace<'_>) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<WorkspaceError>,
{
    let scratch = ScratchDir::create(config.scratch_dir(target))?;
    info!(
        repository = %target.repository,
        branch = %target.branch,
        path = %scratch.path.display(),
        "Cloning checkout"
    );

    let mut clone = git_authed_command(&scratch.path, &credentials);
    clone.args(["clone", "--branch", &target.branch, &target.clone_url, "."]);
    run_prepared(
        clone,
        &format!("git clone --branch {} {} .", target.branch, target.clone_url),
    )
    .map_err(WorkspaceError::from)?;

    let workspace = Workspace {
        root: &scratch.path,
        credentials: &credentials,
    };
    f(&workspace)
}

/// A live checkout, valid only inside [`with_checkout`].
pub struct Workspace<'a> {
    root: &'a Path,
    credentials: &'a BotCredentials,
}

impl Workspace<'_> {
    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn credentials(&self) -> &BotCredentials {
        self.credentials
    }

    /// Resolves a caller-supplied relative path, refusing escapes, `.git` and
    /// parent directories that are symbolic links.
    pub fn resolve(&self, path: &str) -> WorkspaceResult<PathBuf> {
        let refused = |reason| WorkspaceError::UnsafePath {
            path: path.to_string(),
            reason,
        };
        let target = resolve_within(self.root, path).map_err(refused)?;
        // The leaf itself may be a link; replacing or deleting it stays inside.
        if let Some(parent) = target.parent() {
            refuse_symlinks(self.root, parent).map_err(refused)?;
        }
        Ok(target)
    }

    /// [`resolve`](Self::resolve) for a path about to be written, which
    /// would follow a link at the leaf too.
    fn resolve_for_write(&self, path: &str) -> WorkspaceResult<PathBuf> {
        let target = self.resolve(path)?;
        refuse_symlinks(self.root, &target).map_err(|reason| WorkspaceError::UnsafePath {
            path: path.to_string(),
            reason,
        })?;
        Ok(target)
    }

    /// Writes one file, creating parent directories.
    pub fn write_file(&self, path: &str, contents: &[u8]) -> WorkspaceResult<()> {
        let target = self.resolve_for_write(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)?;
        Ok(())
    }

    /// Writes a batch of files (e.g. an extracted artifact). Every path is
    /// checked first; if any is refused, nothing is written.
    pub fn write_files<'p>(
        &self,
        entries: impl IntoIterator<Item = (&'p str, &'p [u8])>,
    ) -> WorkspaceResult<usize> {
        let resolved = entries
            .into_iter()
            .map(|(path, contents)| self.resolve_for_write(path).map(|p| (p, contents)))
            .collect::<WorkspaceResult<Vec<_>>>()?;
        for (target, contents) in &resolved {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, contents)?;
        }
        Ok(resolved.len())
    }

    /// Deletes one file. Unsafe or missing paths are skipped, not errors.
    pub fn delete_file(&self, path: &str) -> WorkspaceResult<bool> {
        let target = match self.resolve(path) {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Skipping deletion");
                return Ok(false);
            }
        };
        match fs::remove_file(&target) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a unified diff to the working tree.
    ///
    /// Every path the patch names is checked before `git apply` runs; one
    /// unsafe path refuses the whole patch.
    pub fn apply_patch(&self, patch: &str) -> WorkspaceResult<()> {
        for path in patch_paths(patch) {
            self.resolve(&path)?;
        }
        run_git_with_input(self.root, &["apply", "--whitespace=nowarn", "-"], patch.as_bytes())?;
        Ok(())
    }

    /// Stages every change.
    pub fn add_all(&self) -> WorkspaceResult<()> {
        run_git_sync(self.root, &["add", "--all"])?;
        Ok(())
    }

    /// Commits staged changes as the bot, optionally attributing authorship
    /// to someone else. Returns the new commit's SHA.
    pub fn commit(&self, message: &str, author: Option<&CommitIdentity>) -> WorkspaceResult<String> {
        let identity = &self.credentials.identity;
        let mut cmd = git_commit_command(self.root, identity);
        cmd.args(["commit", "--no-verify", "-m", message]);
        if identity.signing_key.is_some() {
            cmd.arg("-S");
        }
        if let Some(author) = author {
            cmd.arg("--author").arg(author.author_string());
        }
        run_prepared(cmd, "git commit")?;
        Ok(rev_parse(self.root, "HEAD")?)
    }

    /// Creates a tag at HEAD; annotated (by the bot) when `message` is given.
    pub fn tag(&self, name: &str, message: Option<&str>) -> WorkspaceResult<()> {
        match message {
            Some(message) => {
                let mut cmd = git_commit_command(self.root, &self.credentials.identity);
                cmd.args(["tag", "-a", name, "-m", message]);
                run_prepared(cmd, &format!("git tag -a {name}"))?;
            }
            None => {
                run_git_sync(self.root, &["tag", name])?;
            }
        }
        Ok(())
    }

    /// Pushes HEAD to `branch` on origin.
    pub fn push_head(&self, branch: &str, force: bool) -> WorkspaceResult<PushResult> {
        Ok(push_head_to_branch(self.root, branch, force, self.credentials)?)
    }

    pub fn push_tag(&self, tag: &str) -> WorkspaceResult<()> {
        Ok(push_tag(self.root, tag, self.credentials)?)
    }

    /// Runs an arbitrary local git command and returns its trimmed stdout.
    pub fn git(&self, args: &[&str]) -> WorkspaceResult<String> {
        Ok(run_git_stdout(self.root, args)?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{bare_origin, test_credentials};
    use super::*;
    use crate::runner::ActionError;
    use tempfile::TempDir;

    struct Fixture {
        _origin_dir: TempDir,
        origin: PathBuf,
        base: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let (origin_dir, origin) = bare_origin();
            Fixture {
                _origin_dir: origin_dir,
                origin,
                base: TempDir::new().unwrap(),
            }
        }

        fn config(&self) -> WorkspaceConfig {
            WorkspaceConfig::new(self.base.path())
        }

        fn target(&self) -> CheckoutTarget {
            CheckoutTarget::github(RepoId::new("octo", "widgets"), "main")
                .with_clone_url(self.origin.to_str().unwrap())
        }

        fn leftover_checkouts(&self) -> usize {
            let dir = self.base.path().join("repos/octo/widgets");
            fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
        }
    }

    const ADD_FILE_PATCH: &str = "\
diff --git a/hello.txt b/hello.txt
new file mode 100644
--- /dev/null
+++ b/hello.txt
@@ -0,0 +1 @@
+hello
";

    // ─── Layout ───

    #[test]
    fn scratch_dirs_are_unique_and_scoped() {
        let config = WorkspaceConfig::new("/srv/checkout");
        let repo_target = CheckoutTarget::github(RepoId::new("octo", "widgets"), "main");
        let a = config.scratch_dir(&repo_target);
        let b = config.scratch_dir(&repo_target);
        assert_ne!(a, b);
        assert!(a.starts_with("/srv/checkout/repos/octo/widgets"));

        let pr_target = CheckoutTarget::pull_request(
            RepoId::new("octo", "widgets"),
            42,
            &RepoId::new("contributor", "widgets"),
            "fix-typo",
        );
        assert!(config.scratch_dir(&pr_target).starts_with("/srv/checkout/prs/octo/widgets/pr42"));
        assert_eq!(pr_target.clone_url, "https://github.com/contributor/widgets.git");
    }

    // ─── Cleanup ───

    #[test]
    fn checkout_is_removed_after_success() {
        let fixture = Fixture::new();
        let mut seen = None;
        let readme = with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            seen = Some(ws.root().to_path_buf());
            Ok::<_, WorkspaceError>(fs::read_to_string(ws.root().join("README.md"))?)
        })
        .unwrap();

        assert_eq!(readme, "# widgets\n");
        assert!(!seen.unwrap().exists());
        assert_eq!(fixture.leftover_checkouts(), 0);
    }

    #[test]
    fn checkout_is_removed_after_failure() {
        let fixture = Fixture::new();
        let mut seen = None;
        let err = with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            seen = Some(ws.root().to_path_buf());
            Err::<(), _>(ActionError::failed("caller gave up"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "caller gave up");
        assert!(!seen.unwrap().exists());
        assert_eq!(fixture.leftover_checkouts(), 0);
    }

    #[test]
    fn checkout_is_removed_after_failed_clone() {
        let fixture = Fixture::new();
        let target = fixture.target().with_clone_url("/nonexistent/repo.git");
        let result = with_checkout(&fixture.config(), &target, test_credentials(), |_| {
            Ok::<_, WorkspaceError>(())
        });
        assert!(matches!(result, Err(WorkspaceError::Git(GitError::CommandFailed { .. }))));
        assert_eq!(fixture.leftover_checkouts(), 0);
    }

    #[test]
    fn checkout_is_removed_after_panic() {
        let fixture = Fixture::new();
        let config = fixture.config();
        let target = fixture.target();
        let result = std::panic::catch_unwind(|| {
            with_checkout(&config, &target, test_credentials(), |_| -> WorkspaceResult<()> {
                panic!("caller bug")
            })
        });
        assert!(result.is_err());
        assert_eq!(fixture.leftover_checkouts(), 0);
    }

    // ─── Path safety ───

    #[test]
    fn traversal_patch_writes_nothing() {
        let fixture = Fixture::new();
        let outside = fixture.base.path().join("pwned.txt");
        let patch = "\
--- /dev/null
+++ b/../../pwned.txt
@@ -0,0 +1 @@
+pwned
";
        let err = with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            ws.apply_patch(patch)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::UnsafePath {
                reason: UnsafePath::Traversal,
                ..
            }
        ));
        assert!(!outside.exists());
    }

    #[test]
    fn git_metadata_patch_is_refused() {
        let fixture = Fixture::new();
        let patch = "\
diff --git a/.git/hooks/post-checkout b/.git/hooks/post-checkout
new file mode 100755
--- /dev/null
+++ b/.git/hooks/post-checkout
@@ -0,0 +1 @@
+echo owned
";
        let hook_existed = with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            let err = ws.apply_patch(patch).unwrap_err();
            assert!(matches!(
                err,
                WorkspaceError::UnsafePath {
                    reason: UnsafePath::GitMetadata,
                    ..
                }
            ));
            Ok::<_, WorkspaceError>(ws.root().join(".git/hooks/post-checkout").exists())
        })
        .unwrap();
        assert!(!hook_existed);
    }

    #[test]
    fn batch_write_is_all_or_nothing() {
        let fixture = Fixture::new();
        with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            let entries: [(&str, &[u8]); 2] = [("ok.txt", b"fine"), (".git/config", b"[core]")];
            assert!(ws.write_files(entries).is_err());
            assert!(!ws.root().join("ok.txt").exists());

            let written = ws.write_files([("nested/dir/a.txt", &b"a"[..]), ("b.txt", &b"b"[..])])?;
            assert_eq!(written, 2);
            assert_eq!(fs::read(ws.root().join("nested/dir/a.txt"))?, b"a");
            Ok::<_, WorkspaceError>(())
        })
        .unwrap();
    }

    #[test]
    fn delete_skips_unsafe_paths() {
        let fixture = Fixture::new();
        with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            assert!(!ws.delete_file(".git/HEAD")?);
            assert!(ws.root().join(".git/HEAD").exists());
            assert!(!ws.delete_file("missing.txt")?);
            assert!(ws.delete_file("README.md")?);
            assert!(!ws.root().join("README.md").exists());
            Ok::<_, WorkspaceError>(())
        })
        .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn patched_in_symlink_cannot_be_written_through() {
        let fixture = Fixture::new();
        let outside = TempDir::new().unwrap();
        let patch = format!(
            "diff --git a/link b/link\n\
             new file mode 120000\n\
             --- /dev/null\n\
             +++ b/link\n\
             @@ -0,0 +1 @@\n\
             +{}\n\
             \\ No newline at end of file\n",
            outside.path().display()
        );
        with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            ws.apply_patch(&patch)?;
            assert!(fs::symlink_metadata(ws.root().join("link"))?.file_type().is_symlink());
            assert!(matches!(
                ws.write_file("link/pwned.txt", b"x"),
                Err(WorkspaceError::UnsafePath { reason: UnsafePath::Symlink, .. })
            ));
            assert!(matches!(
                ws.write_file("link", b"x"),
                Err(WorkspaceError::UnsafePath { reason: UnsafePath::Symlink, .. })
            ));
            assert!(matches!(
                ws.write_files([("ok.txt", &b"x"[..]), ("link/pwned.txt", &b"x"[..])]),
                Err(WorkspaceError::UnsafePath { reason: UnsafePath::Symlink, .. })
            ));
            assert!(!ws.root().join("ok.txt").exists());
            Ok::<_, WorkspaceError>(())
        })
        .unwrap();
        assert!(!outside.path().join("pwned.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let fixture = Fixture::new();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("keep.txt"), "precious").unwrap();
        let escape = "\
diff --git a/link/evil.txt b/link/evil.txt
new file mode 100644
--- /dev/null
+++ b/link/evil.txt
@@ -0,0 +1 @@
+evil
";
        with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            std::os::unix::fs::symlink(outside.path(), ws.root().join("link"))?;
            assert!(!ws.delete_file("link/keep.txt")?);
            assert!(matches!(
                ws.apply_patch(escape),
                Err(WorkspaceError::UnsafePath { reason: UnsafePath::Symlink, .. })
            ));
            // Removing the link itself leaves its target alone.
            assert!(ws.delete_file("link")?);
            Ok::<_, WorkspaceError>(())
        })
        .unwrap();
        assert_eq!(fs::read_to_string(outside.path().join("keep.txt")).unwrap(), "precious");
        assert!(!outside.path().join("evil.txt").exists());
    }

    // ─── Git operations ───

    #[test]
    fn apply_commit_and_push() {
        let fixture = Fixture::new();
        let author = CommitIdentity::new("Ada", "ada@example.org");
        let sha = with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            ws.apply_patch(ADD_FILE_PATCH)?;
            ws.add_all()?;
            let sha = ws.commit("Backport #12 to 1.20", Some(&author))?;
            assert_eq!(ws.git(&["log", "-1", "--format=%an|%cn"])?, "Ada|widget-bot[bot]");
            ws.tag("v1.0.1", Some("release 1.0.1"))?;
            assert!(ws.push_head("backport/1.20/12", true)?.is_success());
            ws.push_tag("v1.0.1")?;
            Ok::<_, WorkspaceError>(sha)
        })
        .unwrap();

        let remote = run_git_stdout(&fixture.origin, &["rev-parse", "refs/heads/backport/1.20/12"]).unwrap();
        assert_eq!(remote, sha);
        let tags = run_git_stdout(&fixture.origin, &["tag", "--list"]).unwrap();
        assert_eq!(tags, "v1.0.1");
    }

    #[test]
    fn write_file_creates_parents() {
        let fixture = Fixture::new();
        with_checkout(&fixture.config(), &fixture.target(), test_credentials(), |ws| {
            ws.write_file("a/b/c.txt", b"deep")?;
            assert_eq!(fs::read_to_string(ws.root().join("a/b/c.txt"))?, "deep");
            assert!(matches!(
                ws.write_file("/etc/passwd", b"x"),
                Err(WorkspaceError::UnsafePath { reason: UnsafePath::Absolute, .. })
            ));
            Ok::<_, WorkspaceError>(())
        })
        .unwrap();
    }
}
