//! User-initiated history operations: squash, undo and restore.
//!
//! Each one stages its result in the index and commits the index only, so
//! unrelated working-tree edits stay out of the rewritten history. The
//! resulting commit is synced by the same policy as an automatic one.

use std::path::Path;

use serde::Serialize;

use autocommit_core::{ChangeKind, CommitInfo, CommitOptions, Config, RepoHandle};

use crate::error::SyncError;
use crate::orchestrator::Orchestrator;
use crate::policy::SyncOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryOutcome {
    pub message: String,
    pub head: CommitInfo,
    pub sync: Vec<SyncOutcome>,
}

impl Orchestrator {
    fn index_commit_options(&self, config: &Config) -> CommitOptions {
        CommitOptions {
            include_all: false,
            skip_hooks: config.no_verify,
            timestamp: Some(self.clock.now()),
        }
    }

    async fn finish(
        &self,
        repo: &RepoHandle,
        config: &Config,
        message: String,
    ) -> Result<HistoryOutcome, SyncError> {
        let head = self.vcs.resolve(repo, "HEAD").await?;
        let sync = self.sync_after_commit(repo, config).await;
        Ok(HistoryOutcome {
            message,
            head,
            sync,
        })
    }

    /// Replace the last `count` commits with one commit.
    ///
    /// When `message` is `None` the interaction collaborator is asked, with
    /// the oldest squashed summary as the default.
    pub async fn squash_last(
        &self,
        repo: &RepoHandle,
        config: &Config,
        count: usize,
        message: Option<String>,
    ) -> Result<HistoryOutcome, SyncError> {
        if count < 2 {
            return Err(SyncError::InvalidRequest(
                "squash needs at least two commits".to_string(),
            ));
        }
        let dirty = self
            .vcs
            .changes(repo)
            .await?
            .iter()
            .any(|c| c.kind != ChangeKind::Untracked);
        if dirty {
            return Err(SyncError::InvalidRequest(
                "commit or stash pending changes before squashing".to_string(),
            ));
        }

        let log = self.vcs.log(repo, count + 1).await?;
        if log.len() <= count {
            return Err(SyncError::InvalidRequest(format!(
                "cannot squash {count} commits: only {} below the root commit",
                log.len().saturating_sub(1)
            )));
        }

        let message = match message.filter(|m| !m.trim().is_empty()) {
            Some(message) => message,
            None => self
                .interaction
                .squash_message(&log[count - 1].summary)
                .await
                .filter(|m| !m.trim().is_empty())
                .ok_or(SyncError::Cancelled)?,
        };

        let original_head = log[0].id.clone();
        self.vcs.reset_soft(repo, &format!("HEAD~{count}")).await?;
        if let Err(err) = self
            .vcs
            .commit(repo, &message, &self.index_commit_options(config))
            .await
        {
            if let Err(restore) = self.vcs.reset_soft(repo, &original_head).await {
                tracing::error!(
                    "{}: squash failed and HEAD could not be restored to {original_head}: {restore}",
                    repo.root.display()
                );
            }
            return Err(err.into());
        }
        tracing::info!("{}: squashed {count} commits", repo.root.display());
        self.finish(repo, config, message).await
    }

    /// Commit the inverse of `reference` (default `HEAD`).
    ///
    /// A revert that conflicts, or whose commit fails, is aborted so the
    /// repository is left as it was.
    pub async fn undo(
        &self,
        repo: &RepoHandle,
        config: &Config,
        reference: Option<&str>,
    ) -> Result<HistoryOutcome, SyncError> {
        let target = self.vcs.resolve(repo, reference.unwrap_or("HEAD")).await?;
        if let Err(err) = self.vcs.revert(repo, &target.id).await {
            self.abandon_revert(repo).await;
            return Err(err.into());
        }
        let message = format!("Undo \"{}\"", target.summary);
        if let Err(err) = self
            .vcs
            .commit(repo, &message, &self.index_commit_options(config))
            .await
        {
            self.abandon_revert(repo).await;
            return Err(err.into());
        }
        tracing::info!("{}: reverted {}", repo.root.display(), target.short_id());
        self.finish(repo, config, message).await
    }

    async fn abandon_revert(&self, repo: &RepoHandle) {
        if let Err(err) = self.vcs.abort_revert(repo).await {
            tracing::error!(
                "{}: undo failed and the revert could not be aborted: {err}",
                repo.root.display()
            );
        }
    }

    /// Commit `path` as it was at `reference`.
    ///
    /// Refuses while `path` has edits that are not committed yet, since the
    /// checkout would overwrite them.
    pub async fn restore(
        &self,
        repo: &RepoHandle,
        config: &Config,
        reference: &str,
        path: &Path,
    ) -> Result<HistoryOutcome, SyncError> {
        let relative = self.relative_path(repo, path)?;
        let target = self.vcs.resolve(repo, reference).await?;
        let pending = self
            .vcs
            .changes(repo)
            .await?
            .iter()
            .any(|c| c.path == relative);
        if pending {
            return Err(SyncError::InvalidRequest(format!(
                "{} has uncommitted edits; commit them before restoring",
                relative.display()
            )));
        }
        self.vcs.restore_path(repo, &target.id, &relative).await?;

        let staged = self
            .vcs
            .changes(repo)
            .await?
            .iter()
            .any(|c| c.path == relative);
        if !staged {
            return Err(SyncError::InvalidRequest(format!(
                "{} already matches {}",
                relative.display(),
                target.short_id()
            )));
        }

        let message = format!(
            "Restore {} to {}",
            relative.display().to_string().replace('\\', "/"),
            target.short_id()
        );
        self.vcs
            .commit(repo, &message, &self.index_commit_options(config))
            .await?;
        self.finish(repo, config, message).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::interaction::Decision;
    use crate::testing::{commit_info, FakeVcs, ScriptedInteraction, VcsCall};
    use autocommit_core::{AutoPull, AutoPush, ChangeRecord, StateStore};

    fn quiet() -> Config {
        Config {
            auto_push: AutoPush::Off,
            auto_pull: AutoPull::Off,
            ..Config::default()
        }
    }

    fn history() -> Vec<CommitInfo> {
        vec![
            commit_info("c3c3c3c3c3", "Third"),
            commit_info("b2b2b2b2b2", "Second"),
            commit_info("a1a1a1a1a1", "First"),
        ]
    }

    fn orchestrator(vcs: &Arc<FakeVcs>, interaction: ScriptedInteraction) -> Orchestrator {
        Orchestrator::new(vcs.clone(), StateStore::new(true), Arc::new(interaction))
    }

    fn repo() -> RepoHandle {
        RepoHandle::new("/work/notes")
    }

    #[tokio::test]
    async fn squash_resets_and_commits_the_index_once() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        let outcome = orch
            .squash_last(&repo(), &quiet(), 2, Some("Combine".to_string()))
            .await
            .expect("squash");

        assert_eq!(outcome.message, "Combine");
        assert!(vcs.calls().contains(&VcsCall::ResetSoft {
            target: "HEAD~2".to_string()
        }));
        let commits = vcs.commits();
        assert_eq!(commits.len(), 1);
        assert!(!commits[0].options.include_all);
    }

    #[tokio::test]
    async fn squash_prompts_with_oldest_summary_and_honours_cancel() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let interaction = ScriptedInteraction::new(Decision::Decline).with_squash_message(None);
        let orch = orchestrator(&vcs, interaction.clone());

        let err = orch.squash_last(&repo(), &quiet(), 2, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(interaction.squash_defaults(), vec!["Second".to_string()]);
        assert!(vcs.commits().is_empty());
    }

    #[tokio::test]
    async fn squash_rejects_bad_counts_and_dirty_trees() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        assert!(orch.squash_last(&repo(), &quiet(), 1, Some("x".into())).await.is_err());
        assert!(orch.squash_last(&repo(), &quiet(), 3, Some("x".into())).await.is_err());

        vcs.set_changes(vec![ChangeRecord::new("a.txt", ChangeKind::Modified)]);
        let err = orch
            .squash_last(&repo(), &quiet(), 2, Some("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
        assert!(vcs.commits().is_empty());
    }

    #[tokio::test]
    async fn undo_reverts_and_names_the_commit() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        let outcome = orch.undo(&repo(), &quiet(), None).await.expect("undo");

        assert_eq!(outcome.message, "Undo \"Third\"");
        assert!(vcs.calls().contains(&VcsCall::Revert {
            reference: "c3c3c3c3c3".to_string()
        }));
    }

    #[tokio::test]
    async fn conflicting_undo_is_aborted_without_committing() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()).fail_reverts());
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        let err = orch
            .undo(&repo(), &quiet(), Some("HEAD~1"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("CONFLICT"), "{err}");
        assert_eq!(
            vcs.calls(),
            vec![
                VcsCall::Revert {
                    reference: "b2b2b2b2b2".to_string()
                },
                VcsCall::AbortRevert,
            ]
        );
        assert!(vcs.commits().is_empty());
    }

    #[tokio::test]
    async fn failed_undo_commit_aborts_the_staged_revert() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()).fail_commits());
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        let err = orch.undo(&repo(), &quiet(), None).await.unwrap_err();

        assert!(err.to_string().contains("hook declined"), "{err}");
        assert_eq!(vcs.calls().last(), Some(&VcsCall::AbortRevert));
        assert!(vcs.sync_calls().is_empty(), "nothing is pushed after a failed undo");
    }

    #[tokio::test]
    async fn successful_undo_does_not_abort() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        orch.undo(&repo(), &quiet(), None).await.expect("undo");
        assert!(!vcs.calls().contains(&VcsCall::AbortRevert));
    }

    #[tokio::test]
    async fn restore_refuses_a_path_with_uncommitted_edits() {
        let vcs = Arc::new(
            FakeVcs::new("main")
                .with_log(history())
                .with_changes(vec![ChangeRecord::new("docs/a.md", ChangeKind::Modified)]),
        );
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        let err = orch
            .restore(&repo(), &quiet(), "HEAD~2", Path::new("/work/notes/docs/a.md"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidRequest(ref m) if m.contains("uncommitted")));
        assert!(!vcs
            .calls()
            .iter()
            .any(|c| matches!(c, VcsCall::RestorePath { .. })));
    }

    #[tokio::test]
    async fn restore_ignores_edits_to_other_paths() {
        let vcs = Arc::new(
            FakeVcs::new("main")
                .with_log(history())
                .with_changes(vec![ChangeRecord::new("docs/b.md", ChangeKind::Modified)]),
        );
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        orch.restore(&repo(), &quiet(), "HEAD~2", Path::new("/work/notes/docs/a.md"))
            .await
            .expect("restore");
        assert_eq!(vcs.commits().len(), 1);
    }

    #[tokio::test]
    async fn restore_commits_the_path_at_reference() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));

        let outcome = orch
            .restore(&repo(), &quiet(), "HEAD~2", Path::new("/work/notes/docs/a.md"))
            .await
            .expect("restore");

        assert_eq!(outcome.message, "Restore docs/a.md to a1a1a1a");
        assert!(vcs.calls().contains(&VcsCall::RestorePath {
            reference: "a1a1a1a1a1".to_string(),
            path: PathBuf::from("docs/a.md"),
        }));
    }

    #[tokio::test]
    async fn restore_outside_repository_is_rejected() {
        let vcs = Arc::new(FakeVcs::new("main").with_log(history()));
        let orch = orchestrator(&vcs, ScriptedInteraction::new(Decision::Decline));
        let err = orch
            .restore(&repo(), &quiet(), "HEAD", Path::new("/etc/hosts"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
    }
}
