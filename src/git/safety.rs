//! Path-safety checks for caller-supplied paths inside a checkout.
//!
//! Patches and artifact archives name files with relative paths chosen by
//! someone else. Before anything is written, every such path must stay under
//! the checkout root and must not touch the `.git` metadata directory.
//!
//! The lexical checks alone are not enough once the tree holds symbolic
//! links (a patch may add one), so [`refuse_symlinks`] looks at the disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnsafePath {
    #[error("path is empty")]
    Empty,

    #[error("path is absolute")]
    Absolute,

    #[error("path contains a NUL byte")]
    Nul,

    #[error("path escapes the checkout root")]
    Traversal,

    #[error("path points into .git metadata")]
    GitMetadata,

    #[error("path goes through a symbolic link")]
    Symlink,
}

/// Splits `path` into normal components, refusing anything unsafe.
///
/// Both `/` and `\` separate components, `.` components are dropped, and
/// `.git` is matched case-insensitively (case-insensitive filesystems would
/// otherwise let `.GIT/config` through). Any `..` is refused outright, even
/// one that would stay inside the root.
pub fn safe_components(path: &str) -> Result<Vec<&str>, UnsafePath> {
    if path.contains('\0') {
        return Err(UnsafePath::Nul);
    }
    if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
        return Err(UnsafePath::Absolute);
    }

    let mut components = Vec::new();
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => return Err(UnsafePath::Traversal),
            c if c.eq_ignore_ascii_case(".git") => return Err(UnsafePath::GitMetadata),
            c => components.push(c),
        }
    }

    if components.is_empty() {
        Err(UnsafePath::Empty)
    } else {
        Ok(components)
    }
}

/// Resolves `path` under `root` after [`safe_components`] accepted it.
pub fn resolve_within(root: &Path, path: &str) -> Result<PathBuf, UnsafePath> {
    let components = safe_components(path)?;
    Ok(components
        .into_iter()
        .fold(root.to_path_buf(), |acc, c| acc.join(c)))
}

/// Refuses `target` if it, or any directory between `root` and it, is a
/// symbolic link. Components that do not exist yet are accepted.
pub fn refuse_symlinks(root: &Path, target: &Path) -> Result<(), UnsafePath> {
    let relative = target
        .strip_prefix(root)
        .map_err(|_| UnsafePath::Traversal)?;
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Err(UnsafePath::Symlink),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_hostile_path, arb_safe_path};
    use proptest::prelude::*;

    #[test]
    fn accepts_ordinary_paths() {
        assert_eq!(safe_components("src/main.rs").unwrap(), vec!["src", "main.rs"]);
        assert_eq!(safe_components("./a//b/./c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(safe_components(".github/workflows/ci.yml").unwrap().len(), 3);
        assert!(safe_components("docs/.gitignore").is_ok());
    }

    #[test]
    fn refuses_traversal() {
        assert_eq!(safe_components("../etc/passwd"), Err(UnsafePath::Traversal));
        assert_eq!(safe_components("a/../b"), Err(UnsafePath::Traversal));
        assert_eq!(safe_components("a\\..\\..\\b"), Err(UnsafePath::Traversal));
    }

    #[test]
    fn refuses_git_metadata() {
        assert_eq!(safe_components(".git/config"), Err(UnsafePath::GitMetadata));
        assert_eq!(safe_components("sub/.Git/hooks/pre-commit"), Err(UnsafePath::GitMetadata));
        assert_eq!(safe_components(".git"), Err(UnsafePath::GitMetadata));
    }

    #[test]
    fn refuses_absolute_and_empty() {
        assert_eq!(safe_components("/etc/passwd"), Err(UnsafePath::Absolute));
        assert_eq!(safe_components("\\\\server\\share"), Err(UnsafePath::Absolute));
        assert_eq!(safe_components("C:\\Windows"), Err(UnsafePath::Absolute));
        assert_eq!(safe_components(""), Err(UnsafePath::Empty));
        assert_eq!(safe_components("./."), Err(UnsafePath::Empty));
        assert_eq!(safe_components("a\0b"), Err(UnsafePath::Nul));
    }

    #[cfg(unix)]
    #[test]
    fn refuses_links_anywhere_on_the_way() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("real")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("real/link")).unwrap();

        let through = resolve_within(root.path(), "real/link/file.txt").unwrap();
        assert_eq!(refuse_symlinks(root.path(), &through), Err(UnsafePath::Symlink));
        let leaf = resolve_within(root.path(), "real/link").unwrap();
        assert_eq!(refuse_symlinks(root.path(), &leaf), Err(UnsafePath::Symlink));

        let fresh = resolve_within(root.path(), "real/new/dir/file.txt").unwrap();
        assert_eq!(refuse_symlinks(root.path(), &fresh), Ok(()));
        assert_eq!(refuse_symlinks(root.path(), root.path()), Ok(()));
    }

    #[test]
    fn resolves_under_root() {
        let root = Path::new("/tmp/checkout");
        assert_eq!(
            resolve_within(root, "src/lib.rs").unwrap(),
            PathBuf::from("/tmp/checkout/src/lib.rs")
        );
    }

    proptest! {
        #[test]
        fn safe_paths_stay_under_root(path in arb_safe_path()) {
            let root = Path::new("/work/root");
            let resolved = resolve_within(root, &path).unwrap();
            prop_assert!(resolved.starts_with(root));
            prop_assert!(resolved != root);
        }

        #[test]
        fn hostile_paths_are_refused(path in arb_hostile_path()) {
            prop_assert!(safe_components(&path).is_err());
        }

        #[test]
        fn any_dotdot_component_is_refused(prefix in arb_safe_path(), suffix in arb_safe_path()) {
            let path = format!("{prefix}/../{suffix}");
            prop_assert_eq!(safe_components(&path), Err(UnsafePath::Traversal));
        }
    }
}
