//! Capability set the engine consumes from a version-control backend.

use std::path::Path;

use async_trait::async_trait;

use autocommit_core::{ChangeRecord, CommitInfo, CommitOptions, GitRef, PushMode, RepoHandle};

use crate::error::VcsError;

#[async_trait]
pub trait Vcs: Send + Sync {
    /// Working-tree, index and merge changes, deduplicated by path.
    async fn changes(&self, repo: &RepoHandle) -> Result<Vec<ChangeRecord>, VcsError>;

    /// `None` on a detached HEAD.
    async fn current_branch(&self, repo: &RepoHandle) -> Result<Option<String>, VcsError>;

    async fn remote_refs(&self, repo: &RepoHandle) -> Result<Vec<GitRef>, VcsError>;

    async fn commit(
        &self,
        repo: &RepoHandle,
        message: &str,
        options: &CommitOptions,
    ) -> Result<(), VcsError>;

    /// Fails with [`VcsError::Conflict`] when the remote has diverged.
    async fn push(
        &self,
        repo: &RepoHandle,
        remote: &str,
        branch: &str,
        set_upstream: bool,
        mode: PushMode,
    ) -> Result<(), VcsError>;

    async fn pull(&self, repo: &RepoHandle) -> Result<(), VcsError>;

    /// Diff of `path` against HEAD. Empty for paths without history.
    async fn diff(&self, repo: &RepoHandle, path: &Path) -> Result<String, VcsError>;

    /// Most recent commits first.
    async fn log(&self, repo: &RepoHandle, limit: usize) -> Result<Vec<CommitInfo>, VcsError>;

    /// Resolve a revision to its commit.
    async fn resolve(&self, repo: &RepoHandle, reference: &str) -> Result<CommitInfo, VcsError>;

    /// Move HEAD to `target`, keeping the index and working tree.
    async fn reset_soft(&self, repo: &RepoHandle, target: &str) -> Result<(), VcsError>;

    /// Stage the inverse of `reference` without committing.
    async fn revert(&self, repo: &RepoHandle, reference: &str) -> Result<(), VcsError>;

    /// Drop a revert left behind by [`revert`](Self::revert), restoring the
    /// index and working tree to HEAD. A no-op when none is in progress.
    async fn abort_revert(&self, repo: &RepoHandle) -> Result<(), VcsError>;

    /// Stage `path` as it was at `reference`.
    async fn restore_path(
        &self,
        repo: &RepoHandle,
        reference: &str,
        path: &Path,
    ) -> Result<(), VcsError>;
}
