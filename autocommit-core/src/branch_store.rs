//! Persisted per-branch enablement.
//!
//! Persists a `BranchStoreFile` JSON document at
//! `<home>/.autocommit/branches/<key>.json`, where `<key>` is the first 16 hex
//! digits of the SHA-256 of the repository root. Writes use the same atomic
//! `.tmp` + rename pattern as the config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{home, root_at, set_file_permissions};
use crate::error::{io_err, ConfigError};

/// On-disk payload: remembered enablement per branch of one repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchStoreFile {
    pub repo: PathBuf,
    #[serde(default)]
    pub branches: BTreeMap<String, bool>,
    pub updated_at: DateTime<Utc>,
}

impl BranchStoreFile {
    fn empty(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
            branches: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Stable file key for a repository root.
pub fn repo_key(repo_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_root.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// `<home>/.autocommit/branches/<key>.json`
pub fn store_path_at(home: &Path, repo_root: &Path) -> PathBuf {
    root_at(home)
        .join("branches")
        .join(format!("{}.json", repo_key(repo_root)))
}

/// Load the store for `repo_root`. Returns an empty store if absent.
pub fn load_at(home: &Path, repo_root: &Path) -> Result<BranchStoreFile, ConfigError> {
    let path = store_path_at(home, repo_root);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BranchStoreFile::empty(repo_root))
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    Ok(serde_json::from_str(&contents)?)
}

/// Remembered flag for `branch`, if any.
pub fn get_at(home: &Path, repo_root: &Path, branch: &str) -> Result<Option<bool>, ConfigError> {
    Ok(load_at(home, repo_root)?.branches.get(branch).copied())
}

/// `get_at` convenience wrapper.
pub fn get(repo_root: &Path, branch: &str) -> Result<Option<bool>, ConfigError> {
    get_at(&home()?, repo_root, branch)
}

/// Record `enabled` for `branch` and save atomically.
pub fn set_at(
    home: &Path,
    repo_root: &Path,
    branch: &str,
    enabled: bool,
) -> Result<(), ConfigError> {
    let mut store = load_at(home, repo_root)?;
    store.branches.insert(branch.to_string(), enabled);
    store.updated_at = Utc::now();
    save_at(home, repo_root, &store)
}

/// `set_at` convenience wrapper.
pub fn set(repo_root: &Path, branch: &str, enabled: bool) -> Result<(), ConfigError> {
    set_at(&home()?, repo_root, branch, enabled)
}

fn save_at(home: &Path, repo_root: &Path, store: &BranchStoreFile) -> Result<(), ConfigError> {
    let path = store_path_at(home, repo_root);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid branch store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_store_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = load_at(tmp.path(), Path::new("/work/notes")).unwrap();
        assert!(store.branches.is_empty());
        assert_eq!(get_at(tmp.path(), Path::new("/work/notes"), "main").unwrap(), None);
    }

    #[test]
    fn set_then_get_per_branch() {
        let tmp = TempDir::new().unwrap();
        let repo = Path::new("/work/notes");
        set_at(tmp.path(), repo, "dev", true).unwrap();
        set_at(tmp.path(), repo, "main", false).unwrap();
        assert_eq!(get_at(tmp.path(), repo, "dev").unwrap(), Some(true));
        assert_eq!(get_at(tmp.path(), repo, "main").unwrap(), Some(false));
        assert_eq!(get_at(tmp.path(), Path::new("/work/other"), "dev").unwrap(), None);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let repo = Path::new("/work/notes");
        set_at(tmp.path(), repo, "dev", true).unwrap();
        let tmp_path = store_path_at(tmp.path(), repo).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn repo_key_is_stable_and_short() {
        let a = repo_key(Path::new("/work/notes"));
        assert_eq!(a.len(), 16);
        assert_eq!(a, repo_key(Path::new("/work/notes")));
        assert_ne!(a, repo_key(Path::new("/work/other")));
    }
}
