//! # autocommit-sync
//!
//! The auto-commit orchestration engine and its collaborators.
//!
//! [`Orchestrator::commit`] turns the uncommitted changes of one repository
//! into a commit and syncs it according to policy. [`Orchestrator::push`] and
//! [`Orchestrator::pull`] are the Sync Policy Engine entry points used by
//! interval timers. The history operations (`squash_last`, `undo`,
//! `restore`) live in [`history`].

pub mod diagnostics;
pub mod diff;
pub mod error;
pub mod git;
pub mod history;
pub mod interaction;
pub mod orchestrator;
pub mod partition;
pub mod policy;
pub mod summarizer;
pub mod vcs;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use diagnostics::{DiagnosticsSource, FileDiagnostics, NoDiagnostics};
pub use error::{SummaryError, SyncError, VcsError};
pub use git::GitCli;
pub use history::HistoryOutcome;
pub use interaction::{Decision, Interaction, PolicyInteraction};
pub use orchestrator::{CommitOutcome, CommitRequest, Orchestrator, Trigger};
pub use policy::{SkipReason, SyncOutcome, SyncPolicy};
pub use summarizer::{CommitSummarizer, HttpSummarizer, PromptContext};
pub use vcs::Vcs;
