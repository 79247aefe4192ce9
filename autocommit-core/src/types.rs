//! Domain types shared by the engine, the daemon and the CLI.
//!
//! All path fields use `PathBuf`. Paths inside a [`ChangeRecord`] or a
//! [`DiagnosticMap`] are relative to the repository root.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Repository identity
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a watched repository (its root path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId(pub String);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque reference to one version-controlled working tree.
///
/// The engine never creates or deletes the tree behind a handle; it only
/// observes it and invokes the VCS on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoHandle {
    pub root: PathBuf,
}

impl RepoHandle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn id(&self) -> RepoId {
        RepoId(self.root.display().to_string())
    }

    /// Handle for a nested commit target (e.g. a submodule) owned by this tree.
    pub fn nested(&self, group: &str) -> RepoHandle {
        RepoHandle::new(self.root.join(group))
    }

    /// Express `path` relative to the repository root when it lives under it.
    pub fn relativize(&self, path: &Path) -> Option<PathBuf> {
        if path.is_relative() {
            return Some(path.to_path_buf());
        }
        path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// Kind of an uncommitted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
    Renamed,
    Untracked,
    Conflicted,
    TypeChanged,
}

impl ChangeKind {
    /// Whether the path has no committed history to diff against.
    pub fn is_new(self) -> bool {
        matches!(self, ChangeKind::Added | ChangeKind::Untracked)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Modified => "modified",
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Untracked => "untracked",
            ChangeKind::Conflicted => "conflicted",
            ChangeKind::TypeChanged => "typechange",
        };
        f.write_str(label)
    }
}

/// One modified/added/deleted/renamed path in a working tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Owning commit target when one handle fronts several (e.g. a submodule path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ChangeRecord {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            group: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            message: None,
        }
    }
}

/// Outstanding diagnostics keyed by repo-relative path.
pub type DiagnosticMap = HashMap<PathBuf, Vec<Diagnostic>>;

// ---------------------------------------------------------------------------
// Policy enums
// ---------------------------------------------------------------------------

/// How a push treats a remote that has diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PushMode {
    #[default]
    ForcePush,
    ForcePushWithLease,
    Push,
}

impl fmt::Display for PushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushMode::ForcePush => write!(f, "forcePush"),
            PushMode::ForcePushWithLease => write!(f, "forcePushWithLease"),
            PushMode::Push => write!(f, "push"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AutoPush {
    #[default]
    OnCommit,
    AfterDelay,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AutoPull {
    OnCommit,
    #[default]
    OnPush,
    AfterDelay,
    Off,
}

/// Which diagnostic severities block a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    #[default]
    Error,
    Warning,
    None,
}

// ---------------------------------------------------------------------------
// VCS payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitOptions {
    /// Stage every tracked and untracked change before committing.
    pub include_all: bool,
    /// Bypass commit hooks (`--no-verify`).
    pub skip_hooks: bool,
    /// Author and committer date, recorded in UTC.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefKind {
    Head,
    RemoteHead,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitRef {
    pub name: String,
    pub kind: RefKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
    pub time: DateTime<Utc>,
}

impl CommitInfo {
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(7);
        &self.id[..end]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
