//! Enablement decisions.
//!
//! A repository's scheduler is attached if and only if auto-commit is on for
//! it and the repository's current branch (when it can be resolved) does not
//! match any `excludeBranches` pattern. Auto-commit is on when the
//! process-wide flag is set or the branch is named [`OPT_IN_BRANCH`].

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled `excludeBranches` patterns. Invalid patterns are skipped.
#[derive(Debug, Clone)]
pub struct BranchExclusions {
    set: GlobSet,
    raw: Vec<String>,
}

impl BranchExclusions {
    pub fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut raw = Vec::new();
        for pattern in patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
                raw.push(pattern.clone());
            }
        }
        let set = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self { set, raw }
    }

    pub fn is_excluded(&self, branch: &str) -> bool {
        self.set.is_match(branch)
    }

    pub fn patterns(&self) -> &[String] {
        &self.raw
    }
}

impl Default for BranchExclusions {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
            raw: Vec::new(),
        }
    }
}

/// Checking out a branch with this name turns auto-commit on for that
/// repository without touching the process-wide flag.
pub const OPT_IN_BRANCH: &str = "autocommit";

/// Whether the scheduler for a repository should be attached.
pub fn should_attach(enabled: bool, branch: Option<&str>, exclusions: &BranchExclusions) -> bool {
    let opted_in = enabled || branch == Some(OPT_IN_BRANCH);
    opted_in && !branch.is_some_and(|name| exclusions.is_excluded(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Attach,
    Detach,
    Unchanged,
}

pub fn transition(attached: bool, desired: bool) -> Transition {
    match (attached, desired) {
        (false, true) => Transition::Attach,
        (true, false) => Transition::Detach,
        _ => Transition::Unchanged,
    }
}

/// Apply a persisted per-branch record to the process-wide flag.
pub fn echo_persisted(enabled: bool, persisted: Option<bool>) -> bool {
    persisted.unwrap_or(enabled)
}
