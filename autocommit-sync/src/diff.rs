//! Per-file diffs handed to the commit summarizer.

use std::io::ErrorKind;
use std::path::Path;

use similar::TextDiff;

use autocommit_core::{ChangeRecord, RepoHandle};

use crate::summarizer::FileDiff;
use crate::vcs::Vcs;

/// Diff every change against HEAD.
///
/// Paths without history are rendered against the empty file. This is a
/// best-effort path: a file that cannot be diffed is logged and left out.
pub async fn collect(vcs: &dyn Vcs, repo: &RepoHandle, changes: &[ChangeRecord]) -> Vec<FileDiff> {
    let mut diffs = Vec::with_capacity(changes.len());
    for change in changes {
        let diff = if change.kind.is_new() {
            new_file_diff(&repo.root, &change.path)
        } else {
            match vcs.diff(repo, &change.path).await {
                Ok(diff) => Some(diff),
                Err(err) => {
                    tracing::warn!("diff of {} failed: {err}", change.path.display());
                    None
                }
            }
        };
        if let Some(diff) = diff {
            diffs.push(FileDiff {
                path: change.path.to_string_lossy().replace('\\', "/"),
                diff,
            });
        }
    }
    diffs
}

fn new_file_diff(root: &Path, relative: &Path) -> Option<String> {
    let path = root.join(relative);
    let content = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!("cannot read {}: {err}", path.display());
            return None;
        }
    };
    let Ok(text) = String::from_utf8(content) else {
        return Some(format!("Binary file {} added", relative.display()));
    };
    let text = normalize_line_endings(&text);
    let new_header = format!("b/{}", relative.display());
    Some(
        TextDiff::from_lines("", text.as_str())
            .unified_diff()
            .header("/dev/null", &new_header)
            .context_radius(3)
            .to_string(),
    )
}

fn normalize_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVcs;
    use autocommit_core::ChangeKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn untracked_files_diff_against_empty_and_tracked_use_vcs() {
        let dir = TempDir::new().expect("repo");
        std::fs::write(dir.path().join("todo.md"), "- write tests\r\n").expect("write");
        let repo = RepoHandle::new(dir.path());
        let vcs = FakeVcs::new("main").with_diff("notes.md", "@@ -1 +1 @@\n-a\n+b\n");

        let diffs = collect(
            &vcs,
            &repo,
            &[
                ChangeRecord::new("notes.md", ChangeKind::Modified),
                ChangeRecord::new("todo.md", ChangeKind::Untracked),
                ChangeRecord::new("vanished.md", ChangeKind::Untracked),
            ],
        )
        .await;

        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "notes.md");
        assert!(diffs[0].diff.contains("+b"));
        assert_eq!(diffs[1].path, "todo.md");
        assert!(diffs[1].diff.contains("+++ b/todo.md"));
        assert!(diffs[1].diff.contains("+- write tests\n"));
    }
}
