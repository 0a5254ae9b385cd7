//! Reading file names out of unified diffs.

const DEV_NULL: &str = "/dev/null";

/// Files touched by a unified diff, in order of appearance.
///
/// Each `--- old` line directly followed by a `+++ new` line contributes one
/// entry: the old name, or the new name when the old one is `/dev/null`
/// (a created file). Names are reported as written, prefixes included.
pub fn changed_files(diff: &str) -> Vec<String> {
    let mut changed = Vec::new();
    let mut lines = diff.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(removed) = line.strip_prefix("--- ") else {
            continue;
        };
        let Some(added) = lines.peek().and_then(|next| next.strip_prefix("+++ ")) else {
            continue;
        };
        let removed = removed.trim();
        if removed == DEV_NULL {
            changed.push(added.trim().to_string());
        } else {
            changed.push(removed.to_string());
        }
        lines.next();
    }
    changed
}

/// Every repository path a patch would read or write, with the `a/` and `b/`
/// prefixes removed and duplicates dropped.
///
/// Covers `---`/`+++` headers, `diff --git` headers and rename/copy lines,
/// so a patch cannot smuggle a path past a check through any one of them.
/// Hunk bodies are skipped by their line counts: a removed line reading
/// `-- x` is content, not a header.
pub fn patch_paths(patch: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let path = strip_side(header_name(raw));
        if path.is_empty() || path == DEV_NULL {
            return;
        }
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    };

    // Lines still owed to the current hunk, old side and new side.
    let mut hunk = (0usize, 0usize);
    for line in patch.lines() {
        if hunk != (0, 0) {
            match line.as_bytes().first() {
                None | Some(b' ') => {
                    hunk = (hunk.0.saturating_sub(1), hunk.1.saturating_sub(1));
                    continue;
                }
                Some(b'-') if hunk.0 > 0 => {
                    hunk.0 -= 1;
                    continue;
                }
                Some(b'+') if hunk.1 > 0 => {
                    hunk.1 -= 1;
                    continue;
                }
                Some(b'\\') => continue,
                // A short hunk; read the line as a header.
                _ => hunk = (0, 0),
            }
        }

        if let Some(counts) = hunk_counts(line) {
            hunk = counts;
        } else if let Some(rest) = line.strip_prefix("--- ").or_else(|| line.strip_prefix("+++ ")) {
            push(rest);
        } else if let Some(rest) = line.strip_prefix("diff --git ") {
            match rest.rfind(" b/") {
                Some(split) => {
                    push(&rest[..split]);
                    push(&rest[split + 1..]);
                }
                None => push(rest),
            }
        } else if let Some(rest) = ["rename from ", "rename to ", "copy from ", "copy to "]
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix))
        {
            push(rest);
        }
    }
    paths
}

/// `(old, new)` line counts of a `@@ -l[,n] +l[,n] @@` hunk header. An
/// omitted count is 1.
fn hunk_counts(line: &str) -> Option<(usize, usize)> {
    let ranges = line.strip_prefix("@@ -")?;
    let (old, rest) = ranges.split_once(" +")?;
    let (new, _) = rest.split_once(" @@")?;
    let count = |range: &str| match range.split_once(',') {
        Some((_, n)) => n.parse().ok(),
        None => range.parse::<usize>().ok().map(|_| 1),
    };
    Some((count(old)?, count(new)?))
}

/// Drops a trailing timestamp (`name<TAB>date`) and surrounding whitespace.
fn header_name(raw: &str) -> &str {
    raw.split('\t').next().unwrap_or(raw).trim()
}

fn strip_side(name: &str) -> &str {
    name.strip_prefix("a/")
        .or_else(|| name.strip_prefix("b/"))
        .unwrap_or(name)
}
