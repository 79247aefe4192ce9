//! Prompts the engine delegates to whoever is in front of it.

use async_trait::async_trait;

use autocommit_core::RepoHandle;

/// Answer to a yes/no prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Decline,
}

impl Decision {
    pub fn from_bool(confirmed: bool) -> Self {
        if confirmed {
            Decision::Confirm
        } else {
            Decision::Decline
        }
    }
}

#[async_trait]
pub trait Interaction: Send + Sync {
    /// The remote diverged; may the push be retried with unconditional force?
    async fn confirm_force_push(&self, repo: &RepoHandle, branch: &str) -> Decision;

    /// Message for a squash commit, pre-filled with `default`. `None` cancels.
    async fn squash_message(&self, default: &str) -> Option<String>;
}

/// Non-interactive answers taken from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyInteraction {
    force_on_conflict: bool,
}

impl PolicyInteraction {
    pub fn new(force_on_conflict: bool) -> Self {
        Self { force_on_conflict }
    }
}

#[async_trait]
impl Interaction for PolicyInteraction {
    async fn confirm_force_push(&self, repo: &RepoHandle, branch: &str) -> Decision {
        tracing::info!(
            "push of {branch} in {} was rejected; forcePushOnConflict={}",
            repo.root.display(),
            self.force_on_conflict
        );
        Decision::from_bool(self.force_on_conflict)
    }

    async fn squash_message(&self, default: &str) -> Option<String> {
        Some(default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn policy_answers_from_configuration() {
        let repo = RepoHandle::new("/work/notes");
        assert_eq!(
            PolicyInteraction::new(true).confirm_force_push(&repo, "main").await,
            Decision::Confirm
        );
        assert_eq!(
            PolicyInteraction::default()
                .confirm_force_push(&repo, "main")
                .await,
            Decision::Decline
        );
        assert_eq!(
            PolicyInteraction::default().squash_message("WIP").await,
            Some("WIP".to_string())
        );
    }
}
