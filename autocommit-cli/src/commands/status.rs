//! `autocommit status` — enablement and per-repository activity.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use autocommit_core::config;
use autocommit_daemon::{request, DaemonError, DaemonRequest};

/// Arguments for `autocommit status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let report = load_report(&home)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(&report);
        Ok(())
    }
}

/// The daemon's status payload, or the configured view when it is not running.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatusReport {
    running: bool,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at_unix: Option<i64>,
    #[serde(default)]
    repositories: Vec<RepoStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RepoStatus {
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    attached: bool,
    #[serde(default)]
    pulling: bool,
    #[serde(default)]
    pushing: bool,
    #[serde(default)]
    timers: Vec<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "activity")]
    activity: String,
    #[tabled(rename = "timers")]
    timers: String,
}

fn load_report(home: &Path) -> Result<StatusReport> {
    match request(home, &DaemonRequest::new("status")) {
        Ok(status) => from_daemon(status),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            let global = config::load_at(home).context("failed to load configuration")?;
            Ok(StatusReport {
                running: false,
                enabled: global.enabled,
                started_at_unix: None,
                repositories: global
                    .repositories
                    .iter()
                    .map(|path| RepoStatus {
                        repo: path.display().to_string(),
                        ..RepoStatus::default()
                    })
                    .collect(),
            })
        }
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn from_daemon(status: Value) -> Result<StatusReport> {
    serde_json::from_value(status).context("unexpected daemon status payload")
}

fn print_table(report: &StatusReport) {
    let enabled = if report.enabled {
        "enabled".green().bold()
    } else {
        "disabled".yellow().bold()
    };
    let daemon = match report.started_at_unix.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
        Some(started) if report.running => format!(
            "daemon running since {}",
            started.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        _ if report.running => "daemon running".to_string(),
        _ => "daemon not running".bright_black().to_string(),
    };
    println!(
        "autocommit v{} | {enabled} | {daemon} | {} repositories",
        env!("CARGO_PKG_VERSION"),
        report.repositories.len(),
    );

    if report.repositories.is_empty() {
        println!("No repositories open.");
        return;
    }

    let rows: Vec<StatusTableRow> = report.repositories.iter().map(table_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn table_row(repo: &RepoStatus) -> StatusTableRow {
    let activity = match (repo.pulling, repo.pushing) {
        (true, true) => "pulling, pushing",
        (true, false) => "pulling",
        (false, true) => "pushing",
        (false, false) => "-",
    };
    StatusTableRow {
        repo: repo.repo.clone(),
        branch: repo
            .branch
            .clone()
            .unwrap_or_else(|| "(detached)".to_string()),
        state: if repo.attached { "attached" } else { "idle" }.to_string(),
        activity: activity.to_string(),
        timers: if repo.timers.is_empty() {
            "-".to_string()
        } else {
            repo.timers.join(", ")
        },
    }
}
