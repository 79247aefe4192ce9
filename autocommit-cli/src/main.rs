//! autocommit — commit and sync working trees automatically.
//!
//! # Usage
//!
//! ```text
//! autocommit daemon start|stop|status|logs
//! autocommit enable [--branch]
//! autocommit disable [--branch]
//! autocommit repo add|remove [<path>]
//! autocommit repo list
//! autocommit commit [-m <message>] [--repo <path>]
//! autocommit squash <n> [-m <message>] [--repo <path>]
//! autocommit undo [<ref>] [--repo <path>]
//! autocommit restore <ref> <path> [--repo <path>]
//! autocommit status [--json]
//! ```

mod commands;
mod target;
mod terminal;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    history::{CommitArgs, RestoreArgs, SquashArgs, UndoArgs},
    repo::RepoCommand,
    status::StatusArgs,
    toggle::ToggleArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "autocommit",
    version,
    about = "Commit and sync git working trees automatically",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Turn automatic commits on.
    Enable(ToggleArgs),

    /// Turn automatic commits off.
    Disable(ToggleArgs),

    /// Manage the repositories the daemon opens.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },

    /// Commit pending changes now.
    Commit(CommitArgs),

    /// Replace the last N commits with one.
    Squash(SquashArgs),

    /// Commit the inverse of a commit (default HEAD).
    Undo(UndoArgs),

    /// Commit a file as it was at an earlier revision.
    Restore(RestoreArgs),

    /// Show enablement and per-repository activity.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Enable(args) => args.run(true),
        Commands::Disable(args) => args.run(false),
        Commands::Repo { command } => commands::repo::run(command),
        Commands::Commit(args) => args.run(),
        Commands::Squash(args) => args.run(),
        Commands::Undo(args) => args.run(),
        Commands::Restore(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
