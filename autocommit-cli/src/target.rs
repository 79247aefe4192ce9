//! Which repository a command acts on, and where it runs.
//!
//! A repository the daemon has open is served through the socket so the
//! operation is ordered with the daemon's own commits. Anything else runs
//! in this process against `git` directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::runtime::Runtime;

use autocommit_core::{config, Config, RepoHandle, RepoId, StateStore};
use autocommit_daemon::{request, DaemonError, DaemonRequest};
use autocommit_sync::{summarizer, GitCli, Orchestrator};

use crate::terminal::TerminalInteraction;

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn current_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("could not read current directory")?;
    Ok(canonical(&cwd))
}

/// The working tree containing `explicit`, or the current directory.
pub fn resolve_repo(runtime: &Runtime, explicit: Option<&Path>) -> Result<RepoHandle> {
    let start = match explicit {
        Some(path) => canonical(path),
        None => current_dir()?,
    };
    let handle = runtime.block_on(GitCli::new().discover(&start))?;
    Ok(RepoHandle::new(canonical(&handle.root)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Daemon,
    InProcess,
}

pub fn route(home: &Path, repo: &RepoHandle) -> Result<Route> {
    match request(home, &DaemonRequest::new("status")) {
        Ok(status) if daemon_has_repo(&status, &repo.id()) => Ok(Route::Daemon),
        Ok(_) | Err(DaemonError::DaemonNotRunning { .. }) => Ok(Route::InProcess),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn daemon_has_repo(status: &Value, id: &RepoId) -> bool {
    status
        .get("repositories")
        .and_then(Value::as_array)
        .map(|repos| {
            repos
                .iter()
                .any(|repo| repo.get("repo").and_then(Value::as_str) == Some(id.0.as_str()))
        })
        .unwrap_or(false)
}

/// Effective configuration and an orchestrator that asks on the terminal.
pub fn local_orchestrator(home: &Path, repo: &RepoHandle) -> Result<(Orchestrator, Config)> {
    let config = config::resolve_for_repo_at(home, &repo.root)
        .with_context(|| format!("failed to load configuration for {}", repo.root.display()))?;
    let orchestrator = Orchestrator::new(
        Arc::new(GitCli::new()),
        StateStore::new(config.enabled),
        Arc::new(TerminalInteraction),
    )
    .with_template_override(summarizer::template_override_at(home));
    Ok((orchestrator, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_repositories_listed_by_the_daemon_are_routed_to_it() {
        let status = json!({
            "running": true,
            "repositories": [{ "repo": "/work/notes", "attached": false }],
        });
        assert!(daemon_has_repo(&status, &RepoId::from("/work/notes")));
        assert!(!daemon_has_repo(&status, &RepoId::from("/work/other")));
        assert!(!daemon_has_repo(&json!({ "running": true }), &RepoId::from("/work/notes")));
    }
}
