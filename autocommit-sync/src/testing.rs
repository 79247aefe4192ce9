//! Recording fakes for the collaborator traits.
//!
//! Compiled for this crate's tests and, behind the `test-support` feature,
//! for the daemon's tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use autocommit_core::{
    ChangeKind, ChangeRecord, CommitInfo, CommitOptions, DiagnosticMap, GitRef, PushMode, RefKind,
    RepoHandle,
};

use crate::diagnostics::DiagnosticsSource;
use crate::error::{SummaryError, SyncError, VcsError};
use crate::interaction::{Decision, Interaction};
use crate::summarizer::{CommitSummarizer, PromptContext};
use crate::vcs::Vcs;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn commit_info(id: &str, summary: &str) -> CommitInfo {
    CommitInfo {
        id: id.to_string(),
        summary: summary.to_string(),
        time: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now),
    }
}

// ---------------------------------------------------------------------------
// FakeVcs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    Commit {
        repo: PathBuf,
        message: String,
    },
    Push {
        repo: PathBuf,
        remote: String,
        branch: String,
        set_upstream: bool,
        mode: PushMode,
    },
    Pull {
        repo: PathBuf,
    },
    ResetSoft {
        target: String,
    },
    Revert {
        reference: String,
    },
    AbortRevert,
    RestorePath {
        reference: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub repo: PathBuf,
    pub message: String,
    pub options: CommitOptions,
}

#[derive(Debug, Default)]
struct FakeState {
    branch: Option<String>,
    has_remote: bool,
    main_changes: Vec<ChangeRecord>,
    tree_changes: HashMap<PathBuf, Vec<ChangeRecord>>,
    diffs: HashMap<PathBuf, String>,
    log: VecDeque<CommitInfo>,
    rejected_pushes: usize,
    fail_pushes: bool,
    fail_commits: bool,
    fail_reverts: bool,
    calls: Vec<VcsCall>,
    commits: Vec<RecordedCommit>,
}

/// In-memory [`Vcs`] that records every mutating call.
///
/// `changes` answers from per-root lists (see
/// [`with_tree_changes`](Self::with_tree_changes)) or the main list; a
/// commit empties the list it answered from and prepends to the log.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<FakeState>,
}

impl FakeVcs {
    pub fn new(branch: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                branch: Some(branch.to_string()),
                has_remote: true,
                ..FakeState::default()
            }),
        }
    }

    pub fn detached() -> Self {
        Self {
            state: Mutex::new(FakeState {
                has_remote: true,
                ..FakeState::default()
            }),
        }
    }

    pub fn without_remote(self) -> Self {
        lock(&self.state).has_remote = false;
        self
    }

    pub fn with_changes(self, changes: Vec<ChangeRecord>) -> Self {
        self.set_changes(changes);
        self
    }

    pub fn with_tree_changes(self, root: impl Into<PathBuf>, changes: Vec<ChangeRecord>) -> Self {
        lock(&self.state).tree_changes.insert(root.into(), changes);
        self
    }

    pub fn with_diff(self, path: impl Into<PathBuf>, diff: &str) -> Self {
        lock(&self.state).diffs.insert(path.into(), diff.to_string());
        self
    }

    pub fn with_log(self, log: Vec<CommitInfo>) -> Self {
        lock(&self.state).log = log.into();
        self
    }

    /// The first `count` pushes fail with a divergence conflict.
    pub fn reject_pushes(self, count: usize) -> Self {
        lock(&self.state).rejected_pushes = count;
        self
    }

    pub fn fail_pushes(self) -> Self {
        lock(&self.state).fail_pushes = true;
        self
    }

    pub fn fail_commits(self) -> Self {
        lock(&self.state).fail_commits = true;
        self
    }

    /// Reverts stop on a conflict.
    pub fn fail_reverts(self) -> Self {
        lock(&self.state).fail_reverts = true;
        self
    }

    pub fn set_changes(&self, changes: Vec<ChangeRecord>) {
        lock(&self.state).main_changes = changes;
    }

    pub fn set_branch(&self, branch: Option<&str>) {
        lock(&self.state).branch = branch.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        lock(&self.state).calls.clone()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        lock(&self.state).commits.clone()
    }

    pub fn push_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, VcsCall::Push { .. }))
            .count()
    }

    /// Push and pull calls rendered as `"push <remote> <branch> <mode>"` and `"pull"`.
    pub fn sync_calls(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                VcsCall::Push {
                    remote, branch, mode, ..
                } => Some(format!("push {remote} {branch} {mode}")),
                VcsCall::Pull { .. } => Some("pull".to_string()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn changes(&self, repo: &RepoHandle) -> Result<Vec<ChangeRecord>, VcsError> {
        let guard = lock(&self.state);
        let state = &*guard;
        Ok(state
            .tree_changes
            .get(&repo.root)
            .unwrap_or(&state.main_changes)
            .clone())
    }

    async fn current_branch(&self, _repo: &RepoHandle) -> Result<Option<String>, VcsError> {
        Ok(lock(&self.state).branch.clone())
    }

    async fn remote_refs(&self, _repo: &RepoHandle) -> Result<Vec<GitRef>, VcsError> {
        let state = lock(&self.state);
        if !state.has_remote {
            return Ok(Vec::new());
        }
        let branch = state.branch.as_deref().unwrap_or("main");
        Ok(vec![GitRef {
            name: format!("origin/{branch}"),
            kind: RefKind::RemoteHead,
        }])
    }

    async fn commit(
        &self,
        repo: &RepoHandle,
        message: &str,
        options: &CommitOptions,
    ) -> Result<(), VcsError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.calls.push(VcsCall::Commit {
            repo: repo.root.clone(),
            message: message.to_string(),
        });
        if state.fail_commits {
            return Err(VcsError::Failed {
                command: "git commit".to_string(),
                stderr: "hook declined".to_string(),
            });
        }
        state.commits.push(RecordedCommit {
            repo: repo.root.clone(),
            message: message.to_string(),
            options: options.clone(),
        });
        match state.tree_changes.get_mut(&repo.root) {
            Some(changes) => changes.clear(),
            None => state.main_changes.clear(),
        }
        let id = format!("{:040x}", state.commits.len());
        state.log.push_front(commit_info(&id, message));
        Ok(())
    }

    async fn push(
        &self,
        repo: &RepoHandle,
        remote: &str,
        branch: &str,
        set_upstream: bool,
        mode: PushMode,
    ) -> Result<(), VcsError> {
        let mut state = lock(&self.state);
        state.calls.push(VcsCall::Push {
            repo: repo.root.clone(),
            remote: remote.to_string(),
            branch: branch.to_string(),
            set_upstream,
            mode,
        });
        if state.rejected_pushes > 0 {
            state.rejected_pushes -= 1;
            return Err(VcsError::Conflict {
                stderr: " ! [rejected] (fetch first)".to_string(),
            });
        }
        if state.fail_pushes {
            return Err(VcsError::Failed {
                command: "git push".to_string(),
                stderr: "could not read Username".to_string(),
            });
        }
        Ok(())
    }

    async fn pull(&self, repo: &RepoHandle) -> Result<(), VcsError> {
        lock(&self.state).calls.push(VcsCall::Pull {
            repo: repo.root.clone(),
        });
        Ok(())
    }

    async fn diff(&self, _repo: &RepoHandle, path: &Path) -> Result<String, VcsError> {
        Ok(lock(&self.state).diffs.get(path).cloned().unwrap_or_default())
    }

    async fn log(&self, _repo: &RepoHandle, limit: usize) -> Result<Vec<CommitInfo>, VcsError> {
        Ok(lock(&self.state).log.iter().take(limit).cloned().collect())
    }

    async fn resolve(&self, _repo: &RepoHandle, reference: &str) -> Result<CommitInfo, VcsError> {
        let state = lock(&self.state);
        let found = match reference.strip_prefix("HEAD") {
            Some("") => state.log.front(),
            Some(rest) => rest
                .strip_prefix('~')
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|n| state.log.get(n)),
            None => state.log.iter().find(|c| c.id.starts_with(reference)),
        };
        found.cloned().ok_or_else(|| VcsError::Failed {
            command: "git log".to_string(),
            stderr: format!("unknown revision {reference}"),
        })
    }

    async fn reset_soft(&self, _repo: &RepoHandle, target: &str) -> Result<(), VcsError> {
        lock(&self.state).calls.push(VcsCall::ResetSoft {
            target: target.to_string(),
        });
        Ok(())
    }

    async fn revert(&self, _repo: &RepoHandle, reference: &str) -> Result<(), VcsError> {
        let mut state = lock(&self.state);
        state.calls.push(VcsCall::Revert {
            reference: reference.to_string(),
        });
        if state.fail_reverts {
            return Err(VcsError::Failed {
                command: "git revert --no-commit".to_string(),
                stderr: "CONFLICT (content): Merge conflict in notes.md".to_string(),
            });
        }
        Ok(())
    }

    async fn abort_revert(&self, _repo: &RepoHandle) -> Result<(), VcsError> {
        lock(&self.state).calls.push(VcsCall::AbortRevert);
        Ok(())
    }

    async fn restore_path(
        &self,
        _repo: &RepoHandle,
        reference: &str,
        path: &Path,
    ) -> Result<(), VcsError> {
        let mut state = lock(&self.state);
        state.calls.push(VcsCall::RestorePath {
            reference: reference.to_string(),
            path: path.to_path_buf(),
        });
        state
            .main_changes
            .push(ChangeRecord::new(path, ChangeKind::Modified));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics, summaries, prompts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StaticDiagnostics {
    map: DiagnosticMap,
}

impl StaticDiagnostics {
    pub fn new(map: DiagnosticMap) -> Self {
        Self { map }
    }
}

impl DiagnosticsSource for StaticDiagnostics {
    fn diagnostics(&self, _repo: &RepoHandle) -> Result<DiagnosticMap, SyncError> {
        Ok(self.map.clone())
    }
}

/// Summarizer with a canned answer; `None` means the request fails.
#[derive(Debug, Default)]
pub struct StaticSummarizer {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl StaticSummarizer {
    pub fn returning(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitSummarizer for StaticSummarizer {
    async fn generate(&self, _context: &PromptContext) -> Result<Option<String>, SummaryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Some(answer) => Ok(Some(answer.clone())),
            None => Err(SummaryError::Http("connection refused".to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct Prompts {
    force_push: usize,
    squash_defaults: Vec<String>,
}

/// Fixed answers; clones share the prompt log.
#[derive(Debug, Clone)]
pub struct ScriptedInteraction {
    decision: Decision,
    squash_message: Option<String>,
    use_default_squash: bool,
    prompts: Arc<Mutex<Prompts>>,
}

impl ScriptedInteraction {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            squash_message: None,
            use_default_squash: true,
            prompts: Arc::default(),
        }
    }

    /// Answer squash prompts with `message`; `None` cancels.
    pub fn with_squash_message(mut self, message: Option<&str>) -> Self {
        self.squash_message = message.map(str::to_string);
        self.use_default_squash = false;
        self
    }

    pub fn force_push_prompts(&self) -> usize {
        lock(&self.prompts).force_push
    }

    pub fn squash_defaults(&self) -> Vec<String> {
        lock(&self.prompts).squash_defaults.clone()
    }
}

#[async_trait]
impl Interaction for ScriptedInteraction {
    async fn confirm_force_push(&self, _repo: &RepoHandle, _branch: &str) -> Decision {
        lock(&self.prompts).force_push += 1;
        self.decision
    }

    async fn squash_message(&self, default: &str) -> Option<String> {
        lock(&self.prompts).squash_defaults.push(default.to_string());
        if self.use_default_squash {
            return Some(default.to_string());
        }
        self.squash_message.clone()
    }
}
