//! Sync Policy Engine: push and pull one repository against its remote.
//!
//! Each operation takes the matching [`Activity`] flag through
//! [`StateStore::begin`] before touching the remote and holds the guard until
//! it returns, so two pushes (or two pulls) never overlap for one handle.
//! A push rejected because the remote diverged is offered to the
//! [`Interaction`] collaborator once; a confirmed retry uses unconditional
//! force and is never retried again.

use std::sync::Arc;

use serde::Serialize;

use autocommit_core::{Activity, AutoPull, Config, PushMode, RefKind, RepoHandle, StateStore};

use crate::error::VcsError;
use crate::interaction::{Decision, Interaction};
use crate::vcs::Vcs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// No remote-tracking refs: nothing to sync with.
    NoRemote,
    DetachedHead,
    /// The same activity is already running for this repository.
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "camelCase")]
pub enum SyncOutcome {
    Pushed,
    /// Rejected, confirmed, and retried with force.
    ForcePushed,
    /// Rejected and the retry was declined; the commit stays local.
    Declined,
    Pulled,
    Skipped(SkipReason),
    Failed(String),
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }
}

pub struct SyncPolicy {
    vcs: Arc<dyn Vcs>,
    state: Arc<StateStore>,
    interaction: Arc<dyn Interaction>,
}

impl SyncPolicy {
    pub fn new(vcs: Arc<dyn Vcs>, state: Arc<StateStore>, interaction: Arc<dyn Interaction>) -> Self {
        Self {
            vcs,
            state,
            interaction,
        }
    }

    async fn has_remotes(&self, repo: &RepoHandle) -> Result<bool, VcsError> {
        let refs = self.vcs.remote_refs(repo).await?;
        Ok(refs.iter().any(|r| r.kind == RefKind::RemoteHead))
    }

    pub async fn push(&self, repo: &RepoHandle, config: &Config) -> SyncOutcome {
        match self.has_remotes(repo).await {
            Ok(true) => {}
            Ok(false) => return SyncOutcome::Skipped(SkipReason::NoRemote),
            Err(err) => return failed(repo, "push", err),
        }
        let branch = match self.vcs.current_branch(repo).await {
            Ok(Some(branch)) => branch,
            Ok(None) => {
                tracing::warn!("{}: detached HEAD, not pushing", repo.root.display());
                return SyncOutcome::Skipped(SkipReason::DetachedHead);
            }
            Err(err) => return failed(repo, "push", err),
        };

        let result = {
            let Some(_pushing) = self.state.begin(&repo.id(), Activity::Pushing) else {
                return SyncOutcome::Skipped(SkipReason::InFlight);
            };
            if config.auto_pull == AutoPull::OnPush {
                let pulled = self.pull(repo).await;
                if pulled.is_failure() {
                    tracing::warn!("{}: pushing despite failed pull", repo.root.display());
                }
            }
            self.vcs
                .push(repo, &config.remote, &branch, false, config.push_mode)
                .await
        };

        match result {
            Ok(()) => {
                tracing::info!("{}: pushed {branch} to {}", repo.root.display(), config.remote);
                SyncOutcome::Pushed
            }
            Err(err) if err.is_conflict() => self.retry_forced(repo, config, &branch).await,
            Err(err) => failed(repo, "push", err),
        }
    }

    async fn retry_forced(&self, repo: &RepoHandle, config: &Config, branch: &str) -> SyncOutcome {
        if self.interaction.confirm_force_push(repo, branch).await == Decision::Decline {
            tracing::warn!(
                "{}: remote has conflicting changes; commit kept local",
                repo.root.display()
            );
            return SyncOutcome::Declined;
        }
        let Some(_pushing) = self.state.begin(&repo.id(), Activity::Pushing) else {
            return SyncOutcome::Skipped(SkipReason::InFlight);
        };
        match self
            .vcs
            .push(repo, &config.remote, branch, false, PushMode::ForcePush)
            .await
        {
            Ok(()) => {
                tracing::info!("{}: force-pushed {branch}", repo.root.display());
                SyncOutcome::ForcePushed
            }
            Err(err) => failed(repo, "forced push", err),
        }
    }

    pub async fn pull(&self, repo: &RepoHandle) -> SyncOutcome {
        match self.has_remotes(repo).await {
            Ok(true) => {}
            Ok(false) => return SyncOutcome::Skipped(SkipReason::NoRemote),
            Err(err) => return failed(repo, "pull", err),
        }
        let Some(_pulling) = self.state.begin(&repo.id(), Activity::Pulling) else {
            return SyncOutcome::Skipped(SkipReason::InFlight);
        };
        match self.vcs.pull(repo).await {
            Ok(()) => SyncOutcome::Pulled,
            Err(err) => failed(repo, "pull", err),
        }
    }
}

fn failed(repo: &RepoHandle, what: &str, err: VcsError) -> SyncOutcome {
    tracing::error!("{}: {what} failed: {err}", repo.root.display());
    SyncOutcome::Failed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeVcs, ScriptedInteraction, VcsCall};

    fn policy(vcs: &Arc<FakeVcs>, answer: Decision) -> (SyncPolicy, Arc<StateStore>) {
        let state = StateStore::new(true);
        let policy = SyncPolicy::new(
            vcs.clone(),
            Arc::clone(&state),
            Arc::new(ScriptedInteraction::new(answer)),
        );
        (policy, state)
    }

    fn no_pull() -> Config {
        Config {
            auto_pull: AutoPull::Off,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn no_remote_skips_silently() {
        let vcs = Arc::new(FakeVcs::new("main").without_remote());
        let (policy, _) = policy(&vcs, Decision::Confirm);
        let repo = RepoHandle::new("/work/notes");
        assert_eq!(
            policy.push(&repo, &Config::default()).await,
            SyncOutcome::Skipped(SkipReason::NoRemote)
        );
        assert_eq!(
            policy.pull(&repo).await,
            SyncOutcome::Skipped(SkipReason::NoRemote)
        );
        assert!(vcs.calls().iter().all(|c| !matches!(c, VcsCall::Push { .. } | VcsCall::Pull { .. })));
    }

    #[tokio::test]
    async fn pull_on_push_runs_before_push() {
        let vcs = Arc::new(FakeVcs::new("main"));
        let (policy, state) = policy(&vcs, Decision::Confirm);
        let repo = RepoHandle::new("/work/notes");

        assert_eq!(policy.push(&repo, &Config::default()).await, SyncOutcome::Pushed);
        assert_eq!(vcs.sync_calls(), vec!["pull".to_string(), "push origin main forcePush".to_string()]);
        let activity = state.repo(&repo.id()).expect("registered");
        assert!(!activity.pushing && !activity.pulling);
    }

    #[tokio::test]
    async fn conflict_confirmed_retries_once_with_force() {
        let vcs = Arc::new(FakeVcs::new("main").reject_pushes(usize::MAX));
        let (policy, _) = policy(&vcs, Decision::Confirm);
        let config = Config {
            push_mode: PushMode::ForcePushWithLease,
            ..no_pull()
        };

        let outcome = policy.push(&RepoHandle::new("/work/notes"), &config).await;

        assert!(outcome.is_failure(), "{outcome:?}");
        assert_eq!(
            vcs.sync_calls(),
            vec![
                "push origin main forcePushWithLease".to_string(),
                "push origin main forcePush".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn conflict_confirmed_then_forced_push_succeeds() {
        let vcs = Arc::new(FakeVcs::new("main").reject_pushes(1));
        let (policy, _) = policy(&vcs, Decision::Confirm);
        let config = Config {
            push_mode: PushMode::Push,
            ..no_pull()
        };
        assert_eq!(
            policy.push(&RepoHandle::new("/work/notes"), &config).await,
            SyncOutcome::ForcePushed
        );
        assert_eq!(vcs.push_count(), 2);
    }

    #[tokio::test]
    async fn conflict_declined_keeps_commit_local() {
        let vcs = Arc::new(FakeVcs::new("main").reject_pushes(1));
        let (policy, state) = policy(&vcs, Decision::Decline);
        let repo = RepoHandle::new("/work/notes");
        assert_eq!(policy.push(&repo, &no_pull()).await, SyncOutcome::Declined);
        assert_eq!(vcs.push_count(), 1);
        assert!(!state.is_active(&repo.id(), Activity::Pushing));
    }

    #[tokio::test]
    async fn other_push_failures_are_not_retried() {
        let vcs = Arc::new(FakeVcs::new("main").fail_pushes());
        let (policy, _) = policy(&vcs, Decision::Confirm);
        let outcome = policy.push(&RepoHandle::new("/work/notes"), &no_pull()).await;
        assert!(outcome.is_failure());
        assert_eq!(vcs.push_count(), 1);
    }

    #[tokio::test]
    async fn push_while_pushing_is_dropped() {
        let vcs = Arc::new(FakeVcs::new("main"));
        let (policy, state) = policy(&vcs, Decision::Confirm);
        let repo = RepoHandle::new("/work/notes");
        let _held = state.begin(&repo.id(), Activity::Pushing).expect("begin");

        assert_eq!(
            policy.push(&repo, &no_pull()).await,
            SyncOutcome::Skipped(SkipReason::InFlight)
        );
        assert_eq!(vcs.push_count(), 0);
    }

    #[tokio::test]
    async fn detached_head_is_not_pushed() {
        let vcs = Arc::new(FakeVcs::detached());
        let (policy, _) = policy(&vcs, Decision::Confirm);
        assert_eq!(
            policy.push(&RepoHandle::new("/work/notes"), &no_pull()).await,
            SyncOutcome::Skipped(SkipReason::DetachedHead)
        );
    }
}
