//! The commit entry point and its chained sync.
//!
//! ```text
//! changes ─▶ filter ─▶ gate ─▶ message ─▶ commit (nested trees, then main) ─▶ push/pull
//!    │          │        │
//!    ▼          ▼        ▼
//! NoChanges  NothingMatched  Ineligible
//! ```
//!
//! Everything up to the commit call is best-effort or a silent skip; a
//! failing commit is returned to the caller. Sync failures are reported in
//! the outcome and never turn a successful commit into an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use autocommit_core::{
    gate, message, AutoPull, AutoPush, ChangeRecord, Clock, CommitOptions, Config, FileFilter,
    MessageFormat, RepoHandle, StateStore, SystemClock, ValidationLevel,
};

use crate::diagnostics::{DiagnosticsSource, FileDiagnostics, NoDiagnostics};
use crate::diff;
use crate::error::SyncError;
use crate::interaction::Interaction;
use crate::partition::partition;
use crate::policy::{SyncOutcome, SyncPolicy};
use crate::summarizer::{CommitSummarizer, HttpSummarizer, PromptContext};
use crate::vcs::Vcs;

/// What asked for the commit; used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// The quiescence delay elapsed.
    Debounce,
    /// A user asked for a commit now.
    Manual,
    /// The repository is being closed or the daemon is stopping.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub message: Option<String>,
    pub trigger: Trigger,
}

impl CommitRequest {
    pub fn automatic() -> Self {
        Self {
            message: None,
            trigger: Trigger::Debounce,
        }
    }

    pub fn manual(message: Option<String>) -> Self {
        Self {
            message: message.filter(|m| !m.trim().is_empty()),
            trigger: Trigger::Manual,
        }
    }

    pub fn on_close() -> Self {
        Self {
            message: None,
            trigger: Trigger::Close,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CommitOutcome {
    Committed {
        message: String,
        /// Nested trees committed before the main tree.
        nested: Vec<String>,
        sync: Vec<SyncOutcome>,
    },
    NoChanges,
    /// There are changes, but none match `filePattern`.
    NothingMatched,
    /// Blocking diagnostics on these paths; nothing was committed.
    Ineligible { blocking: Vec<PathBuf> },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

pub struct Orchestrator {
    pub(crate) vcs: Arc<dyn Vcs>,
    pub(crate) state: Arc<StateStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) interaction: Arc<dyn Interaction>,
    pub(crate) policy: SyncPolicy,
    diagnostics: Option<Arc<dyn DiagnosticsSource>>,
    summarizer: Option<Arc<dyn CommitSummarizer>>,
    template_override: Option<PathBuf>,
}

impl Orchestrator {
    /// Diagnostics and summaries are derived from each call's configuration
    /// unless replaced with [`with_diagnostics`](Self::with_diagnostics) or
    /// [`with_summarizer`](Self::with_summarizer).
    pub fn new(vcs: Arc<dyn Vcs>, state: Arc<StateStore>, interaction: Arc<dyn Interaction>) -> Self {
        let policy = SyncPolicy::new(Arc::clone(&vcs), Arc::clone(&state), Arc::clone(&interaction));
        Self {
            vcs,
            state,
            clock: Arc::new(SystemClock),
            interaction,
            policy,
            diagnostics: None,
            summarizer: None,
            template_override: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_diagnostics(mut self, source: Arc<dyn DiagnosticsSource>) -> Self {
        self.diagnostics = Some(source);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn CommitSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_template_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_override = Some(path.into());
        self
    }

    pub fn vcs(&self) -> &Arc<dyn Vcs> {
        &self.vcs
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    fn diagnostics_for(&self, config: &Config) -> Arc<dyn DiagnosticsSource> {
        if let Some(source) = &self.diagnostics {
            return Arc::clone(source);
        }
        match &config.diagnostics_file {
            Some(path) => Arc::new(FileDiagnostics::new(path)),
            None => Arc::new(NoDiagnostics),
        }
    }

    fn summarizer_for(&self, config: &Config) -> Option<Arc<dyn CommitSummarizer>> {
        if !config.ai.enabled {
            return None;
        }
        if let Some(summarizer) = &self.summarizer {
            return Some(Arc::clone(summarizer));
        }
        match HttpSummarizer::new(&config.ai, self.template_override.as_deref()) {
            Ok(summarizer) => Some(Arc::new(summarizer)),
            Err(err) => {
                tracing::warn!("commit summaries unavailable: {err}");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    pub async fn commit(
        &self,
        repo: &RepoHandle,
        config: &Config,
        request: CommitRequest,
    ) -> Result<CommitOutcome, SyncError> {
        let changes = self.vcs.changes(repo).await?;
        if changes.is_empty() {
            return Ok(CommitOutcome::NoChanges);
        }

        let filter = FileFilter::new(&config.file_pattern);
        let matched: Vec<ChangeRecord> = changes
            .into_iter()
            .filter(|change| filter.matches(&change.path))
            .collect();
        if matched.is_empty() {
            return Ok(CommitOutcome::NothingMatched);
        }

        let paths: Vec<PathBuf> = matched.iter().map(|c| c.path.clone()).collect();
        let blocking = self.blocking_paths(repo, config, &paths);
        if !blocking.is_empty() {
            tracing::info!(
                "{}: skipping commit, blocking diagnostics on {} path(s)",
                repo.root.display(),
                blocking.len()
            );
            return Ok(CommitOutcome::Ineligible { blocking });
        }

        let now = self.clock.now();
        let timestamp = MessageFormat::from_config(config).render(now);
        let generated = match request.message {
            Some(_) => None,
            None => self.generate_summary(repo, config, &matched).await,
        };
        let message = message::assemble(request.message.as_deref(), timestamp, generated);
        let options = CommitOptions {
            include_all: true,
            skip_hooks: config.no_verify,
            timestamp: Some(now),
        };

        let mut nested = Vec::new();
        for target in partition(repo, &matched) {
            let Some(group) = target.group else {
                self.vcs.commit(&target.handle, &message, &options).await?;
                continue;
            };
            if self.vcs.changes(&target.handle).await?.is_empty() {
                continue;
            }
            self.vcs.commit(&target.handle, &message, &options).await?;
            nested.push(group);
        }
        tracing::info!(
            "{}: committed {} path(s) ({:?}): {message}",
            repo.root.display(),
            paths.len(),
            request.trigger
        );

        let sync = self.sync_after_commit(repo, config).await;
        Ok(CommitOutcome::Committed {
            message,
            nested,
            sync,
        })
    }

    fn blocking_paths(&self, repo: &RepoHandle, config: &Config, paths: &[PathBuf]) -> Vec<PathBuf> {
        if config.commit_validation_level == ValidationLevel::None {
            return Vec::new();
        }
        let diagnostics = match self.diagnostics_for(config).diagnostics(repo) {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!("{}: diagnostics unavailable: {err}", repo.root.display());
                Default::default()
            }
        };
        gate::blocking_paths(paths, &diagnostics, config.commit_validation_level)
    }

    async fn generate_summary(
        &self,
        repo: &RepoHandle,
        config: &Config,
        changes: &[ChangeRecord],
    ) -> Option<String> {
        let summarizer = self.summarizer_for(config)?;
        let context = PromptContext {
            diffs: diff::collect(self.vcs.as_ref(), repo, changes).await,
            custom_instructions: config.ai.custom_instructions.clone(),
            use_emojis: config.ai.use_emojis,
        };
        match summarizer.generate(&context).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!("{}: commit summary failed: {err}", repo.root.display());
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// `onCommit` push, then `onCommit` pull, strictly in that order.
    pub(crate) async fn sync_after_commit(&self, repo: &RepoHandle, config: &Config) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();
        if config.auto_push == AutoPush::OnCommit {
            outcomes.push(self.policy.push(repo, config).await);
        }
        if config.auto_pull == AutoPull::OnCommit {
            outcomes.push(self.policy.pull(repo).await);
        }
        outcomes
    }

    pub async fn push(&self, repo: &RepoHandle, config: &Config) -> SyncOutcome {
        self.policy.push(repo, config).await
    }

    pub async fn pull(&self, repo: &RepoHandle) -> SyncOutcome {
        self.policy.pull(repo).await
    }

    pub(crate) fn relative_path(&self, repo: &RepoHandle, path: &Path) -> Result<PathBuf, SyncError> {
        repo.relativize(path)
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                SyncError::InvalidRequest(format!(
                    "{} is not inside {}",
                    path.display(),
                    repo.root.display()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::Decision;
    use crate::testing::{FakeVcs, ScriptedInteraction, StaticDiagnostics, StaticSummarizer};
    use autocommit_core::{ChangeKind, Diagnostic, FixedClock, Severity};
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()))
    }

    fn config() -> Config {
        Config {
            time_zone: Some("UTC".to_string()),
            auto_push: AutoPush::Off,
            auto_pull: AutoPull::Off,
            ..Config::default()
        }
    }

    fn orchestrator(vcs: &Arc<FakeVcs>) -> Orchestrator {
        Orchestrator::new(
            vcs.clone(),
            StateStore::new(true),
            Arc::new(ScriptedInteraction::new(Decision::Decline)),
        )
        .with_clock(clock())
    }

    fn repo() -> RepoHandle {
        RepoHandle::new("/work/notes")
    }

    #[tokio::test]
    async fn no_changes_and_nothing_matched_do_not_commit() {
        let vcs = Arc::new(FakeVcs::new("main"));
        let orch = orchestrator(&vcs);
        let outcome = orch.commit(&repo(), &config(), CommitRequest::automatic()).await.expect("commit");
        assert_eq!(outcome, CommitOutcome::NoChanges);

        vcs.set_changes(vec![ChangeRecord::new("a.txt", ChangeKind::Modified)]);
        let md_only = Config {
            file_pattern: "**/*.md".to_string(),
            ..config()
        };
        let outcome = orch.commit(&repo(), &md_only, CommitRequest::automatic()).await.expect("commit");
        assert_eq!(outcome, CommitOutcome::NothingMatched);
        assert!(vcs.commits().is_empty());
    }

    #[tokio::test]
    async fn gate_blocks_the_whole_commit() {
        let vcs = Arc::new(FakeVcs::new("main").with_changes(vec![
            ChangeRecord::new("a.txt", ChangeKind::Modified),
            ChangeRecord::new("b.txt", ChangeKind::Modified),
        ]));
        let mut map = autocommit_core::DiagnosticMap::new();
        map.insert(PathBuf::from("a.txt"), vec![Diagnostic::new(Severity::Error)]);
        let orch = orchestrator(&vcs).with_diagnostics(Arc::new(StaticDiagnostics::new(map)));

        let outcome = orch.commit(&repo(), &config(), CommitRequest::automatic()).await.expect("commit");
        assert_eq!(
            outcome,
            CommitOutcome::Ineligible {
                blocking: vec![PathBuf::from("a.txt")]
            }
        );
        assert!(vcs.commits().is_empty());

        let relaxed = Config {
            commit_validation_level: ValidationLevel::None,
            ..config()
        };
        let outcome = orch.commit(&repo(), &relaxed, CommitRequest::automatic()).await.expect("commit");
        assert!(outcome.is_committed());
    }

    #[tokio::test]
    async fn explicit_message_skips_the_summarizer() {
        let vcs = Arc::new(FakeVcs::new("main").with_changes(vec![ChangeRecord::new(
            "notes.md",
            ChangeKind::Modified,
        )]));
        let summarizer = Arc::new(StaticSummarizer::returning("Add notes"));
        let orch = orchestrator(&vcs).with_summarizer(summarizer.clone());
        let mut config = config();
        config.ai.enabled = true;

        orch.commit(&repo(), &config, CommitRequest::manual(Some("Checkpoint".into())))
            .await
            .expect("commit");

        assert_eq!(vcs.commits()[0].message, "Checkpoint");
        assert_eq!(summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn summary_replaces_timestamp_and_commit_date_is_now() {
        let vcs = Arc::new(FakeVcs::new("main").with_changes(vec![ChangeRecord::new(
            "notes.md",
            ChangeKind::Modified,
        )]));
        let summarizer = Arc::new(StaticSummarizer::returning("  Add meeting notes\n"));
        let orch = orchestrator(&vcs).with_summarizer(summarizer.clone());
        let mut config = config();
        config.ai.enabled = true;
        config.no_verify = true;

        orch.commit(&repo(), &config, CommitRequest::automatic()).await.expect("commit");

        let commit = &vcs.commits()[0];
        assert_eq!(commit.message, "Add meeting notes");
        assert!(commit.options.include_all);
        assert!(commit.options.skip_hooks);
        assert_eq!(commit.options.timestamp, Some(clock().now()));
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn nested_trees_commit_before_main() {
        let vcs = Arc::new(
            FakeVcs::new("main")
                .with_changes(vec![
                    ChangeRecord::new("index.md", ChangeKind::Modified),
                    ChangeRecord::new("theme", ChangeKind::Modified).in_group("theme"),
                ])
                .with_tree_changes(
                    "/work/notes/theme",
                    vec![ChangeRecord::new("style.css", ChangeKind::Modified)],
                ),
        );
        let outcome = orchestrator(&vcs)
            .commit(&repo(), &config(), CommitRequest::automatic())
            .await
            .expect("commit");

        let roots: Vec<PathBuf> = vcs.commits().into_iter().map(|c| c.repo).collect();
        assert_eq!(
            roots,
            vec![PathBuf::from("/work/notes/theme"), PathBuf::from("/work/notes")]
        );
        let CommitOutcome::Committed { nested, .. } = outcome else {
            panic!("expected a commit");
        };
        assert_eq!(nested, vec!["theme".to_string()]);
    }

    #[tokio::test]
    async fn commit_failure_propagates_and_skips_sync() {
        let vcs = Arc::new(
            FakeVcs::new("main")
                .with_changes(vec![ChangeRecord::new("a.txt", ChangeKind::Modified)])
                .fail_commits(),
        );
        let err = orchestrator(&vcs)
            .commit(&repo(), &Config::default(), CommitRequest::automatic())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Vcs(_)), "{err}");
        assert_eq!(vcs.push_count(), 0);
    }
}
