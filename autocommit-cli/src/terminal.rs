//! Prompts answered on the terminal for in-process operations.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use autocommit_core::RepoHandle;
use autocommit_sync::{Decision, Interaction};

pub struct TerminalInteraction;

#[async_trait]
impl Interaction for TerminalInteraction {
    async fn confirm_force_push(&self, repo: &RepoHandle, branch: &str) -> Decision {
        let question = format!(
            "{}: '{branch}' has diverged from the remote. Overwrite the remote branch? [y/N] ",
            repo.root.display()
        );
        let answer = prompt(question).await.unwrap_or_default();
        Decision::from_bool(is_yes(&answer))
    }

    async fn squash_message(&self, default: &str) -> Option<String> {
        let answer = prompt(format!("Squash message [{default}]: ")).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            Some(default.to_string())
        } else {
            Some(answer.to_string())
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// `None` when stdin is closed.
async fn prompt(question: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = io::stderr();
        write!(stderr, "{question}").ok()?;
        stderr.flush().ok()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line).ok()?;
        (read > 0).then_some(line)
    })
    .await
    .ok()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::is_yes;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }
}
