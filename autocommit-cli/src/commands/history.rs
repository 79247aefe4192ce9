//! `autocommit commit|squash|undo|restore` — explicit commits and history edits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use autocommit_core::{Config, RepoHandle};
use autocommit_daemon::{request, DaemonRequest};
use autocommit_sync::{CommitRequest, Orchestrator};

use crate::target::{self, Route};

#[derive(Args, Debug)]
pub struct RepoArg {
    /// Repository to act on (defaults to the one containing the current directory).
    #[arg(long, value_name = "PATH")]
    pub repo: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Commit message (default: timestamp, or an AI summary when enabled).
    #[arg(short, long)]
    pub message: Option<String>,

    #[command(flatten)]
    pub target: RepoArg,
}

#[derive(Args, Debug)]
pub struct SquashArgs {
    /// Number of commits to combine (at least 2).
    pub count: usize,

    /// Message for the combined commit; prompted for when omitted.
    #[arg(short, long)]
    pub message: Option<String>,

    #[command(flatten)]
    pub target: RepoArg,
}

#[derive(Args, Debug)]
pub struct UndoArgs {
    /// Commit to revert.
    pub reference: Option<String>,

    #[command(flatten)]
    pub target: RepoArg,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Revision to take the file from.
    pub reference: String,

    /// File to restore, relative to the current directory.
    pub path: PathBuf,

    #[command(flatten)]
    pub target: RepoArg,
}

impl CommitArgs {
    pub fn run(self) -> Result<()> {
        run(self.target, Operation::Commit { message: self.message })
    }
}

impl SquashArgs {
    pub fn run(self) -> Result<()> {
        run(
            self.target,
            Operation::Squash {
                count: self.count,
                message: self.message,
            },
        )
    }
}

impl UndoArgs {
    pub fn run(self) -> Result<()> {
        run(
            self.target,
            Operation::Undo {
                reference: self.reference,
            },
        )
    }
}

impl RestoreArgs {
    pub fn run(self) -> Result<()> {
        let path = if self.path.is_absolute() {
            self.path
        } else {
            target::current_dir()?.join(self.path)
        };
        run(
            self.target,
            Operation::Restore {
                reference: self.reference,
                path,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Operation {
    Commit { message: Option<String> },
    Squash { count: usize, message: Option<String> },
    Undo { reference: Option<String> },
    Restore { reference: String, path: PathBuf },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Commit { .. } => "commit",
            Operation::Squash { .. } => "squash",
            Operation::Undo { .. } => "undo",
            Operation::Restore { .. } => "restore",
        }
    }

    fn request(&self, repo: &RepoHandle) -> DaemonRequest {
        let mut request = DaemonRequest::for_repo(self.name(), repo.root.clone());
        match self.clone() {
            Operation::Commit { message } => request.message = message,
            Operation::Squash { count, message } => {
                request.count = Some(count);
                request.message = message;
            }
            Operation::Undo { reference } => request.reference = reference,
            Operation::Restore { reference, path } => {
                request.reference = Some(reference);
                request.path = Some(path);
            }
        }
        request
    }

    async fn run_local(
        self,
        orchestrator: &Orchestrator,
        repo: &RepoHandle,
        config: &Config,
    ) -> Result<Value> {
        let value = match self {
            Operation::Commit { message } => serde_json::to_value(
                orchestrator
                    .commit(repo, config, CommitRequest::manual(message))
                    .await?,
            )?,
            Operation::Squash { count, message } => serde_json::to_value(
                orchestrator.squash_last(repo, config, count, message).await?,
            )?,
            Operation::Undo { reference } => serde_json::to_value(
                orchestrator.undo(repo, config, reference.as_deref()).await?,
            )?,
            Operation::Restore { reference, path } => serde_json::to_value(
                orchestrator.restore(repo, config, &reference, &path).await?,
            )?,
        };
        Ok(value)
    }
}

fn run(target: RepoArg, operation: Operation) -> Result<()> {
    let home = target::home()?;
    let runtime = target::runtime()?;
    let repo = target::resolve_repo(&runtime, target.repo.as_deref())?;
    let name = operation.name();

    let outcome = match target::route(&home, &repo)? {
        Route::Daemon => request(&home, &operation.request(&repo))
            .with_context(|| format!("{name} failed in the daemon"))?,
        Route::InProcess => {
            let (orchestrator, config) = target::local_orchestrator(&home, &repo)?;
            runtime
                .block_on(operation.run_local(&orchestrator, &repo, &config))
                .with_context(|| format!("{name} failed for {}", repo.root.display()))?
        }
    };

    print_outcome(&outcome);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_outcome(outcome: &Value) {
    let text = |key: &str| outcome.get(key).and_then(Value::as_str).unwrap_or_default();
    match outcome.get("status").and_then(Value::as_str) {
        Some("committed") => println!("{} committed: {}", "✓".green(), text("message")),
        Some("noChanges") => println!("nothing to commit"),
        Some("nothingMatched") => println!("no changed file matches filePattern"),
        Some("ineligible") => {
            println!("{} not committed: blocking diagnostics", "✗".red());
            for path in outcome
                .get("blocking")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                println!("  {path}");
            }
        }
        _ => println!("{} {}", "✓".green(), text("message")),
    }

    for sync in outcome
        .get("sync")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        println!("  {}", sync_label(sync));
    }
}

fn sync_label(sync: &Value) -> String {
    let status = sync.get("status").and_then(Value::as_str).unwrap_or("unknown");
    match sync.get("detail").and_then(Value::as_str) {
        Some(detail) if status == "failed" => format!("{} {detail}", "sync failed:".red()),
        Some(detail) => format!("{status} ({detail})"),
        None => status.to_string(),
    }
}
