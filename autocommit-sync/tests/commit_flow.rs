use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use autocommit_core::{
    AutoPull, AutoPush, ChangeKind, ChangeRecord, Config, FixedClock, PushMode, RepoHandle,
    StateStore, ValidationLevel,
};
use autocommit_sync::testing::{FakeVcs, ScriptedInteraction, StaticSummarizer, VcsCall};
use autocommit_sync::{CommitOutcome, CommitRequest, Decision, Orchestrator, SyncOutcome};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
    ))
}

fn scenario_config() -> Config {
    Config {
        auto_commit_delay: 1000,
        auto_push: AutoPush::OnCommit,
        push_mode: PushMode::ForcePush,
        file_pattern: "**/*".to_string(),
        commit_validation_level: ValidationLevel::None,
        time_zone: Some("UTC".to_string()),
        ..Config::default()
    }
}

#[tokio::test]
async fn commit_then_push_exactly_once_in_order() {
    init_logging();
    let vcs = Arc::new(
        FakeVcs::new("main").with_changes(vec![ChangeRecord::new("notes.md", ChangeKind::Modified)]),
    );
    let orch = Orchestrator::new(
        vcs.clone(),
        StateStore::new(true),
        Arc::new(ScriptedInteraction::new(Decision::Decline)),
    )
    .with_clock(fixed_clock());
    let repo = RepoHandle::new("/work/notes");

    let outcome = orch
        .commit(&repo, &scenario_config(), CommitRequest::automatic())
        .await
        .expect("commit");

    let commit_and_push: Vec<VcsCall> = vcs
        .calls()
        .into_iter()
        .filter(|c| matches!(c, VcsCall::Commit { .. } | VcsCall::Push { .. }))
        .collect();
    assert_eq!(
        commit_and_push,
        vec![
            VcsCall::Commit {
                repo: PathBuf::from("/work/notes"),
                message: "Mar 9, 2024, 2:05 PM".to_string(),
            },
            VcsCall::Push {
                repo: PathBuf::from("/work/notes"),
                remote: "origin".to_string(),
                branch: "main".to_string(),
                set_upstream: false,
                mode: PushMode::ForcePush,
            },
        ]
    );
    assert!(vcs.commits()[0].options.include_all);
    assert_eq!(
        outcome,
        CommitOutcome::Committed {
            message: "Mar 9, 2024, 2:05 PM".to_string(),
            nested: Vec::new(),
            sync: vec![SyncOutcome::Pushed],
        }
    );
}

#[tokio::test]
async fn failing_or_empty_summary_falls_back_to_timestamp() {
    init_logging();
    for summarizer in [StaticSummarizer::failing(), StaticSummarizer::returning("   ")] {
        let summarizer = Arc::new(summarizer);
        let vcs = Arc::new(
            FakeVcs::new("main")
                .with_changes(vec![ChangeRecord::new("notes.md", ChangeKind::Modified)]),
        );
        let orch = Orchestrator::new(
            vcs.clone(),
            StateStore::new(true),
            Arc::new(ScriptedInteraction::new(Decision::Decline)),
        )
        .with_clock(fixed_clock())
        .with_summarizer(summarizer.clone());
        let mut config = scenario_config();
        config.auto_push = AutoPush::Off;
        config.ai.enabled = true;

        orch.commit(&RepoHandle::new("/work/notes"), &config, CommitRequest::automatic())
            .await
            .expect("commit");

        assert_eq!(summarizer.calls(), 1);
        assert_eq!(vcs.commits()[0].message, "Mar 9, 2024, 2:05 PM");
    }
}

#[tokio::test]
async fn rejected_push_is_retried_once_after_confirmation() {
    init_logging();
    let vcs = Arc::new(
        FakeVcs::new("dev")
            .with_changes(vec![ChangeRecord::new("a.txt", ChangeKind::Added)])
            .reject_pushes(usize::MAX),
    );
    let interaction = ScriptedInteraction::new(Decision::Confirm);
    let orch = Orchestrator::new(vcs.clone(), StateStore::new(true), Arc::new(interaction.clone()))
        .with_clock(fixed_clock());
    let config = Config {
        push_mode: PushMode::Push,
        auto_pull: AutoPull::Off,
        ..scenario_config()
    };

    let outcome = orch
        .commit(&RepoHandle::new("/work/notes"), &config, CommitRequest::automatic())
        .await
        .expect("a rejected push does not fail the commit");

    assert!(outcome.is_committed());
    assert_eq!(interaction.force_push_prompts(), 1);
    assert_eq!(
        vcs.sync_calls(),
        vec!["push origin dev push".to_string(), "push origin dev forcePush".to_string()]
    );
}

#[tokio::test]
async fn on_commit_pull_follows_push() {
    let vcs = Arc::new(
        FakeVcs::new("main").with_changes(vec![ChangeRecord::new("a.txt", ChangeKind::Modified)]),
    );
    let orch = Orchestrator::new(
        vcs.clone(),
        StateStore::new(true),
        Arc::new(ScriptedInteraction::new(Decision::Decline)),
    );
    let config = Config {
        auto_pull: AutoPull::OnCommit,
        ..scenario_config()
    };

    orch.commit(&RepoHandle::new("/work/notes"), &config, CommitRequest::automatic())
        .await
        .expect("commit");

    assert_eq!(
        vcs.sync_calls(),
        vec!["push origin main forcePush".to_string(), "pull".to_string()]
    );
}
