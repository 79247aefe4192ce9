//! Diagnostics collaborators consulted by the commit gate.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use autocommit_core::{Diagnostic, DiagnosticMap, RepoHandle};

use crate::error::{io_err, SyncError};

pub trait DiagnosticsSource: Send + Sync {
    /// Outstanding diagnostics for `repo`, keyed by repo-relative path.
    fn diagnostics(&self, repo: &RepoHandle) -> Result<DiagnosticMap, SyncError>;
}

/// No diagnostics provider is configured: every change is eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

impl DiagnosticsSource for NoDiagnostics {
    fn diagnostics(&self, _repo: &RepoHandle) -> Result<DiagnosticMap, SyncError> {
        Ok(DiagnosticMap::new())
    }
}

/// Reads a JSON map of `path -> [{ "severity": ... }]` written by an editor
/// or linter integration.
///
/// A relative file path is resolved against the repository root. A missing
/// file means no diagnostics. Keys may be repo-relative or absolute paths
/// under the root; anything else is ignored.
#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    path: PathBuf,
}

impl FileDiagnostics {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn resolve(&self, repo: &RepoHandle) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            repo.root.join(&self.path)
        }
    }
}

impl DiagnosticsSource for FileDiagnostics {
    fn diagnostics(&self, repo: &RepoHandle) -> Result<DiagnosticMap, SyncError> {
        let path = self.resolve(repo);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(DiagnosticMap::new()),
            Err(err) => return Err(io_err(&path, err)),
        };
        let parsed: HashMap<String, Vec<Diagnostic>> = serde_json::from_str(&raw)
            .map_err(|err| io_err(&path, std::io::Error::new(ErrorKind::InvalidData, err)))?;

        let mut map = DiagnosticMap::new();
        for (key, entries) in parsed {
            let Some(relative) = repo.relativize(Path::new(&key)) else {
                continue;
            };
            map.entry(relative).or_default().extend(entries);
        }
        Ok(map)
    }
}
