//! Error types for autocommit-sync.

use std::path::PathBuf;

use thiserror::Error;

use autocommit_core::ConfigError;

/// Failures reported by a VCS collaborator.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The VCS executable could not be started.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },

    /// The remote has diverged and rejected a non-forced push.
    #[error("remote rejected push: {stderr}")]
    Conflict { stderr: String },

    /// Output of the command could not be interpreted.
    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}

impl VcsError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, VcsError::Conflict { .. })
    }
}

/// All errors that can arise from orchestration operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("vcs error: {0}")]
    Vcs(#[from] VcsError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The operation was invoked with no resolvable repository.
    #[error("not inside a git repository: {path}")]
    NoRepository { path: PathBuf },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Arguments that cannot be acted on (e.g. squashing fewer than two commits).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The user dismissed a required prompt.
    #[error("cancelled")]
    Cancelled,
}

/// Failures of the commit-summary collaborator. Never escapes the orchestrator.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("prompt template error: {0}")]
    Template(#[from] tera::Error),

    #[error("summary request failed: {0}")]
    Http(String),

    #[error("summary response was not understood: {0}")]
    Response(String),

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
