//! [`Vcs`] implementation backed by the `git` executable.
//!
//! Every call spawns `git` with `tokio::process::Command` in the repository
//! root, with terminal prompts disabled so a daemon never blocks on
//! credentials.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use autocommit_core::{
    ChangeKind, ChangeRecord, CommitInfo, CommitOptions, GitRef, PushMode, RefKind, RepoHandle,
};

use crate::error::{SyncError, VcsError};
use crate::vcs::Vcs;

const LOG_FORMAT: &str = "--format=%H%x1f%s%x1f%cI";

/// Stderr fragments git prints when a push is rejected because the remote moved.
const CONFLICT_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first", "stale info"];

#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command<I, S>(&self, dir: &Path, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn output(&self, mut cmd: Command, label: &str) -> Result<Output, VcsError> {
        cmd.output().await.map_err(|source| VcsError::Spawn {
            command: label.to_string(),
            source,
        })
    }

    /// Run `git <args>` in `repo` and return stdout, failing on non-zero exit.
    async fn run(&self, repo: &RepoHandle, args: &[&str]) -> Result<String, VcsError> {
        let label = label(args);
        let output = self.output(self.command(&repo.root, args), &label).await?;
        check(&label, output)
    }

    /// Resolve the working-tree root containing `path`.
    pub async fn discover(&self, path: &Path) -> Result<RepoHandle, SyncError> {
        let args = ["rev-parse", "--show-toplevel"];
        let output = self
            .output(self.command(path, args), &label(&args))
            .await?;
        if !output.status.success() {
            return Err(SyncError::NoRepository {
                path: path.to_path_buf(),
            });
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(RepoHandle::new(root))
    }

    async fn submodule_paths(&self, repo: &RepoHandle) -> Vec<String> {
        if !repo.root.join(".gitmodules").exists() {
            return Vec::new();
        }
        let args = [
            "config",
            "--file",
            ".gitmodules",
            "--get-regexp",
            r"^submodule\..*\.path$",
        ];
        match self.run(repo, &args).await {
            Ok(out) => out
                .lines()
                .filter_map(|line| line.split_once(' ').map(|(_, path)| path.trim().to_string()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn changes(&self, repo: &RepoHandle) -> Result<Vec<ChangeRecord>, VcsError> {
        let raw = self
            .run(
                repo,
                &["status", "--porcelain=v2", "-z", "--untracked-files=all"],
            )
            .await?;
        let mut changes = parse_status_v2(&raw);
        let submodules = self.submodule_paths(repo).await;
        for change in &mut changes {
            let path = change.path.to_string_lossy();
            if change.group.is_none() && submodules.iter().any(|s| s.as_str() == path) {
                change.group = Some(path.into_owned());
            }
        }
        Ok(changes)
    }

    async fn current_branch(&self, repo: &RepoHandle) -> Result<Option<String>, VcsError> {
        let args = ["symbolic-ref", "--quiet", "--short", "HEAD"];
        let label = label(&args);
        let output = self.output(self.command(&repo.root, args), &label).await?;
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok((!name.is_empty()).then_some(name));
        }
        // `--quiet` exits 1 with no stderr on a detached HEAD.
        if output.stderr.is_empty() {
            return Ok(None);
        }
        Err(VcsError::Failed {
            command: label,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn remote_refs(&self, repo: &RepoHandle) -> Result<Vec<GitRef>, VcsError> {
        let out = self
            .run(
                repo,
                &["for-each-ref", "--format=%(refname)", "refs/remotes"],
            )
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| line.strip_prefix("refs/remotes/"))
            .map(|name| GitRef {
                name: name.to_string(),
                kind: RefKind::RemoteHead,
            })
            .collect())
    }

    async fn commit(
        &self,
        repo: &RepoHandle,
        message: &str,
        options: &CommitOptions,
    ) -> Result<(), VcsError> {
        if options.include_all {
            self.run(repo, &["add", "--all"]).await?;
        }

        let mut args = vec!["commit", "--quiet", "-m", message];
        if options.skip_hooks {
            args.push("--no-verify");
        }
        let label = label(&["commit"]);
        let mut cmd = self.command(&repo.root, &args);
        if let Some(timestamp) = options.timestamp {
            let date = timestamp.to_rfc3339();
            cmd.env("GIT_AUTHOR_DATE", &date)
                .env("GIT_COMMITTER_DATE", &date);
        }
        let output = self.output(cmd, &label).await?;
        check(&label, output).map(|_| ())
    }

    async fn push(
        &self,
        repo: &RepoHandle,
        remote: &str,
        branch: &str,
        set_upstream: bool,
        mode: PushMode,
    ) -> Result<(), VcsError> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("--set-upstream");
        }
        match mode {
            PushMode::ForcePush => args.push("--force"),
            PushMode::ForcePushWithLease => args.push("--force-with-lease"),
            PushMode::Push => {}
        }
        args.extend([remote, branch]);

        let label = label(&args);
        let output = self.output(self.command(&repo.root, &args), &label).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_conflict(&stderr) {
            return Err(VcsError::Conflict { stderr });
        }
        Err(VcsError::Failed {
            command: label,
            stderr,
        })
    }

    async fn pull(&self, repo: &RepoHandle) -> Result<(), VcsError> {
        self.run(repo, &["pull", "--no-edit"]).await.map(|_| ())
    }

    async fn diff(&self, repo: &RepoHandle, path: &Path) -> Result<String, VcsError> {
        let path = path.to_string_lossy();
        let args = ["diff", "HEAD", "--", path.as_ref()];
        let label = label(&args);
        let output = self.output(self.command(&repo.root, args), &label).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Unborn branch: nothing to diff against yet.
        if stderr.contains("ambiguous argument 'HEAD'") || stderr.contains("bad revision") {
            return Ok(String::new());
        }
        Err(VcsError::Failed {
            command: label,
            stderr: stderr.trim().to_string(),
        })
    }

    async fn log(&self, repo: &RepoHandle, limit: usize) -> Result<Vec<CommitInfo>, VcsError> {
        let limit = limit.to_string();
        let args = ["log", "-n", limit.as_str(), LOG_FORMAT];
        let out = self.run(repo, &args).await?;
        parse_log(&label(&args), &out)
    }

    async fn resolve(&self, repo: &RepoHandle, reference: &str) -> Result<CommitInfo, VcsError> {
        let reference = revision("git log", reference)?;
        let args = ["log", "-n", "1", LOG_FORMAT, reference, "--"];
        let label = label(&args);
        let out = self.run(repo, &args).await?;
        parse_log(&label, &out)?
            .into_iter()
            .next()
            .ok_or_else(|| VcsError::Parse {
                command: label,
                detail: format!("no commit for {reference}"),
            })
    }

    async fn reset_soft(&self, repo: &RepoHandle, target: &str) -> Result<(), VcsError> {
        let target = revision("git reset", target)?;
        self.run(repo, &["reset", "--soft", target]).await.map(|_| ())
    }

    async fn revert(&self, repo: &RepoHandle, reference: &str) -> Result<(), VcsError> {
        let reference = revision("git revert", reference)?;
        self.run(repo, &["revert", "--no-commit", reference])
            .await
            .map(|_| ())
    }

    async fn abort_revert(&self, repo: &RepoHandle) -> Result<(), VcsError> {
        let in_progress = self
            .run(repo, &["rev-parse", "-q", "--verify", "REVERT_HEAD"])
            .await
            .is_ok();
        if !in_progress {
            return Ok(());
        }
        self.run(repo, &["revert", "--abort"]).await.map(|_| ())
    }

    async fn restore_path(
        &self,
        repo: &RepoHandle,
        reference: &str,
        path: &Path,
    ) -> Result<(), VcsError> {
        let reference = revision("git checkout", reference)?;
        let path = path.to_string_lossy();
        self.run(repo, &["checkout", reference, "--", path.as_ref()])
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn label(args: &[&str]) -> String {
    let mut label = String::from("git");
    for arg in args.iter().take(3) {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

fn check(label: &str, output: Output) -> Result<String, VcsError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    Err(VcsError::Failed {
        command: label.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Revisions are passed positionally, so one that looks like an option
/// would be parsed as a flag.
fn revision<'a>(command: &str, reference: &'a str) -> Result<&'a str, VcsError> {
    if reference.is_empty() || reference.starts_with('-') {
        return Err(VcsError::Failed {
            command: command.to_string(),
            stderr: format!("invalid revision '{reference}'"),
        });
    }
    Ok(reference)
}

pub(crate) fn is_conflict(stderr: &str) -> bool {
    CONFLICT_MARKERS.iter().any(|marker| stderr.contains(marker))
}

fn kind_from_xy(xy: &str) -> ChangeKind {
    let mut codes = xy.chars();
    let x = codes.next().unwrap_or('.');
    let y = codes.next().unwrap_or('.');
    match (x, y) {
        ('A', _) | (_, 'A') => ChangeKind::Added,
        ('D', _) | (_, 'D') => ChangeKind::Deleted,
        ('T', _) | (_, 'T') => ChangeKind::TypeChanged,
        _ => ChangeKind::Modified,
    }
}

/// Parse `git status --porcelain=v2 -z` output.
///
/// Submodule entries (`sub` field starting with `S`) are tagged with their
/// own path as the owning group.
pub fn parse_status_v2(raw: &str) -> Vec<ChangeRecord> {
    let mut records: BTreeMap<PathBuf, ChangeRecord> = BTreeMap::new();
    let mut tokens = raw.split('\0').filter(|t| !t.is_empty());

    while let Some(token) = tokens.next() {
        let (tag, rest) = token.split_at(1.min(token.len()));
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        let record = match tag {
            "1" => {
                let fields: Vec<&str> = rest.splitn(8, ' ').collect();
                let [xy, sub, _, _, _, _, _, path] = fields.as_slice() else {
                    continue;
                };
                with_submodule(ChangeRecord::new(*path, kind_from_xy(xy)), sub, path)
            }
            "2" => {
                let fields: Vec<&str> = rest.splitn(9, ' ').collect();
                // The original path follows as its own NUL-separated token.
                tokens.next();
                let [_, sub, _, _, _, _, _, _, path] = fields.as_slice() else {
                    continue;
                };
                with_submodule(ChangeRecord::new(*path, ChangeKind::Renamed), sub, path)
            }
            "u" => {
                let fields: Vec<&str> = rest.splitn(10, ' ').collect();
                let Some(path) = fields.get(9) else {
                    continue;
                };
                ChangeRecord::new(*path, ChangeKind::Conflicted)
            }
            "?" => ChangeRecord::new(rest, ChangeKind::Untracked),
            _ => continue,
        };
        records.insert(record.path.clone(), record);
    }

    records.into_values().collect()
}

fn with_submodule(record: ChangeRecord, sub: &str, path: &str) -> ChangeRecord {
    if sub.starts_with('S') {
        record.in_group(path)
    } else {
        record
    }
}

fn parse_log(label: &str, out: &str) -> Result<Vec<CommitInfo>, VcsError> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(3, '\x1f');
            let (Some(id), Some(summary), Some(time)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(VcsError::Parse {
                    command: label.to_string(),
                    detail: line.to_string(),
                });
            };
            let time = DateTime::parse_from_rfc3339(time.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|err| VcsError::Parse {
                    command: label.to_string(),
                    detail: err.to_string(),
                })?;
            Ok(CommitInfo {
                id: id.to_string(),
                summary: summary.to_string(),
                time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordinary_renamed_unmerged_and_untracked_entries() {
        let raw = concat!(
            "1 .M N... 100644 100644 100644 abc abc notes.md\0",
            "1 A. N... 000000 100644 100644 000 abc docs/new file.md\0",
            "2 R. N... 100644 100644 100644 abc abc R100 docs/renamed.md\0docs/old.md\0",
            "u UU N... 100644 100644 100644 100644 a b c conflict.txt\0",
            "? .env\0",
        );
        let records = parse_status_v2(raw);
        let find = |p: &str| {
            records
                .iter()
                .find(|r| r.path == PathBuf::from(p))
                .unwrap_or_else(|| panic!("missing {p}"))
        };
        assert_eq!(records.len(), 5);
        assert_eq!(find("notes.md").kind, ChangeKind::Modified);
        assert_eq!(find("docs/new file.md").kind, ChangeKind::Added);
        assert_eq!(find("docs/renamed.md").kind, ChangeKind::Renamed);
        assert_eq!(find("conflict.txt").kind, ChangeKind::Conflicted);
        assert_eq!(find(".env").kind, ChangeKind::Untracked);
        assert!(records.iter().all(|r| r.group.is_none()));
    }

    #[test]
    fn submodule_entries_are_grouped() {
        let raw = "1 .M SC.. 160000 160000 160000 abc abc vendor/lib\0";
        let records = parse_status_v2(raw);
        assert_eq!(records[0].group.as_deref(), Some("vendor/lib"));
    }

    #[test]
    fn deleted_entries() {
        let raw = "1 .D N... 100644 100644 000000 abc abc gone.txt\0";
        assert_eq!(parse_status_v2(raw)[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn conflict_markers_are_detected() {
        assert!(is_conflict(
            " ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs"
        ));
        assert!(is_conflict(" ! [rejected] main -> main (stale info)"));
        assert!(!is_conflict("fatal: could not read Username"));
    }

    #[test]
    fn option_like_revisions_are_rejected() {
        assert_eq!(revision("git log", "HEAD~1").expect("plain"), "HEAD~1");
        assert_eq!(revision("git log", "v1.0-rc").expect("dash inside"), "v1.0-rc");
        for bad in ["--output=/tmp/x", "-p", ""] {
            let err = revision("git revert", bad).unwrap_err();
            assert!(err.to_string().contains("invalid revision"), "{bad}: {err}");
        }
    }

    #[test]
    fn parses_log_lines() {
        let out = "0123456789abcdef\x1fAdd notes\x1f2024-03-09T14:05:00+01:00\n";
        let commits = parse_log("git log", out).expect("parse");
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].summary, "Add notes");
        assert_eq!(commits[0].time.to_rfc3339(), "2024-03-09T13:05:00+00:00");
    }

    #[test]
    fn malformed_log_line_is_an_error() {
        assert!(parse_log("git log", "only-an-id\n").is_err());
    }
}
