//! `autocommit enable` / `autocommit disable`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use autocommit_core::{branch_store, config};
use autocommit_daemon::{request, DaemonError, DaemonRequest};
use autocommit_sync::{GitCli, Vcs};

use crate::target;

#[derive(Args, Debug)]
pub struct ToggleArgs {
    /// Also remember the choice for the current branch.
    #[arg(long)]
    pub branch: bool,

    /// Repository whose branch is remembered when the daemon is not running.
    #[arg(long, value_name = "PATH", requires = "branch")]
    pub repo: Option<PathBuf>,
}

impl ToggleArgs {
    pub fn run(self, enabled: bool) -> Result<()> {
        let home = target::home()?;
        let word = if enabled { "enabled" } else { "disabled" };

        let mut toggle = DaemonRequest::new(if enabled { "enable" } else { "disable" });
        toggle.persist_for_branch = self.branch;
        match request(&home, &toggle) {
            Ok(_) => {
                println!("auto-commit {word}");
                if self.branch {
                    println!("remembered for the current branch of every open repository");
                }
                return Ok(());
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {}
            Err(err) => return Err(err).context("failed to reach the daemon"),
        }

        // No daemon: record the flag where the next daemon start will read it.
        let mut global = config::load_at(&home).context("failed to load configuration")?;
        global.enabled = enabled;
        config::save_at(&home, &global).context("failed to save configuration")?;
        println!("auto-commit {word} (takes effect when the daemon starts)");

        if self.branch {
            let runtime = target::runtime()?;
            let repo = target::resolve_repo(&runtime, self.repo.as_deref())?;
            let branch = runtime
                .block_on(GitCli::new().current_branch(&repo))
                .context("failed to read the current branch")?
                .context("HEAD is detached; there is no branch to remember")?;
            branch_store::set_at(&home, &repo.root, &branch, enabled)
                .context("failed to save branch setting")?;
            println!("remembered for '{branch}' in {}", repo.root.display());
        }
        Ok(())
    }
}
