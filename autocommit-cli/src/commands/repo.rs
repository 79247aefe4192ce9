//! `autocommit repo add|remove|list`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use autocommit_core::config;
use autocommit_daemon::{request, DaemonError, DaemonRequest};

use crate::target;

/// Manage the repositories the daemon opens at start.
#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Register a repository (default: the one containing the current directory).
    Add(RepoPathArgs),

    /// Unregister a repository.
    Remove(RepoPathArgs),

    /// List registered repositories.
    List,
}

#[derive(Args, Debug)]
pub struct RepoPathArgs {
    pub path: Option<PathBuf>,
}

pub fn run(cmd: RepoCommand) -> Result<()> {
    let home = target::home()?;
    match cmd {
        RepoCommand::Add(args) => {
            let runtime = target::runtime()?;
            let repo = target::resolve_repo(&runtime, args.path.as_deref())?;
            let added = config::add_repository_at(&home, repo.root.clone())
                .context("failed to update configuration")?;
            if added {
                println!("✓ Added {}", repo.root.display());
                reload_daemon(&home)?;
            } else {
                println!("{} is already registered", repo.root.display());
            }
        }
        RepoCommand::Remove(args) => {
            let path = match args.path {
                Some(path) => std::fs::canonicalize(&path).unwrap_or(path),
                None => {
                    let runtime = target::runtime()?;
                    target::resolve_repo(&runtime, None)?.root
                }
            };
            let removed = config::remove_repository_at(&home, &path)
                .context("failed to update configuration")?;
            if removed {
                println!("✓ Removed {}", path.display());
                reload_daemon(&home)?;
            } else {
                println!("{} is not registered", path.display());
            }
        }
        RepoCommand::List => {
            let global = config::load_at(&home).context("failed to load configuration")?;
            if global.repositories.is_empty() {
                println!("No repositories registered.");
                println!("Run: autocommit repo add <path>");
                return Ok(());
            }
            for repo in &global.repositories {
                println!("{}", repo.display());
            }
        }
    }
    Ok(())
}

/// Ask a running daemon to pick up the new repository list now.
fn reload_daemon(home: &std::path::Path) -> Result<()> {
    match request(home, &DaemonRequest::new("reload")) {
        Ok(_) | Err(DaemonError::DaemonNotRunning { .. }) => Ok(()),
        Err(err) => Err(err).context("failed to reload the daemon"),
    }
}
