//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.autocommit/
//!   config.yaml            (global settings, mode 0600)
//! <repo>/
//!   .autocommit.yaml       (optional per-repository overlay)
//! ```
//!
//! The effective configuration for a repository is the global file with the
//! overlay merged over it key by key. Every key is optional.
//!
//! # API pattern
//!
//! Every function that touches the home directory has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{io_err, ConfigError};
use crate::types::{AutoPull, AutoPush, PushMode, ValidationLevel};

pub const DEFAULT_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MESSAGE_FORMAT: &str = "%b %-d, %Y, %-I:%M %p";
pub const DEFAULT_FILE_PATTERN: &str = "**/*";
pub const REPO_OVERLAY_FILE: &str = ".autocommit.yaml";
pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub enabled: bool,
    /// Quiescence delay before an automatic commit, in milliseconds.
    pub auto_commit_delay: u64,
    pub auto_push: AutoPush,
    pub auto_push_delay: u64,
    pub auto_pull: AutoPull,
    pub auto_pull_delay: u64,
    pub push_mode: PushMode,
    pub pull_on_open: bool,
    pub commit_on_close: bool,
    /// chrono strftime pattern for timestamp commit messages.
    pub commit_message_format: String,
    pub commit_validation_level: ValidationLevel,
    pub file_pattern: String,
    pub exclude_branches: Vec<String>,
    pub time_zone: Option<String>,
    pub no_verify: bool,
    pub remote: String,
    /// Answer for the divergence prompt when nobody is at a terminal.
    pub force_push_on_conflict: bool,
    pub diagnostics_file: Option<PathBuf>,
    pub repositories: Vec<PathBuf>,
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_commit_delay: DEFAULT_DELAY_MS,
            auto_push: AutoPush::OnCommit,
            auto_push_delay: DEFAULT_DELAY_MS,
            auto_pull: AutoPull::OnPush,
            auto_pull_delay: DEFAULT_DELAY_MS,
            push_mode: PushMode::ForcePush,
            pull_on_open: true,
            commit_on_close: true,
            commit_message_format: DEFAULT_MESSAGE_FORMAT.to_string(),
            commit_validation_level: ValidationLevel::Error,
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            exclude_branches: Vec::new(),
            time_zone: None,
            no_verify: false,
            remote: "origin".to_string(),
            force_push_on_conflict: false,
            diagnostics_file: None,
            repositories: Vec::new(),
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    pub fn commit_delay(&self) -> Duration {
        Duration::from_millis(self.auto_commit_delay)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.auto_push_delay.max(1))
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.auto_pull_delay.max(1))
    }
}

/// Settings for generated commit summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiConfig {
    pub enabled: bool,
    pub model: String,
    pub custom_instructions: Option<String>,
    pub use_emojis: bool,
    /// Base URL of an OpenAI-compatible API.
    pub endpoint: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o-mini".to_string(),
            custom_instructions: None,
            use_emojis: false,
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.autocommit/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".autocommit")
}

/// `<home>/.autocommit/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join(CONFIG_FILE)
}

/// `<repo>/.autocommit.yaml` — pure, no I/O.
pub fn overlay_path(repo_root: &Path) -> PathBuf {
    repo_root.join(REPO_OVERLAY_FILE)
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the global configuration. A missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    let value = read_yaml_value(&path)?.unwrap_or(Value::Null);
    from_value(&path, value)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Effective configuration for the repository rooted at `repo_root`.
pub fn resolve_for_repo_at(home: &Path, repo_root: &Path) -> Result<Config, ConfigError> {
    let global_path = config_path_at(home);
    let mut merged = read_yaml_value(&global_path)?.unwrap_or(Value::Null);

    let overlay = overlay_path(repo_root);
    let Some(overlay_value) = read_yaml_value(&overlay)? else {
        return from_value(&global_path, merged);
    };
    merge_values(&mut merged, overlay_value);
    from_value(&overlay, merged)
}

/// `resolve_for_repo_at` convenience wrapper.
pub fn resolve_for_repo(repo_root: &Path) -> Result<Config, ConfigError> {
    resolve_for_repo_at(&home()?, repo_root)
}

fn read_yaml_value(path: &Path) -> Result<Option<Value>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Some(Value::Null));
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn from_value(path: &Path, value: Value) -> Result<Config, ConfigError> {
    if value.is_null() {
        return Ok(Config::default());
    }
    serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively merge `overlay` into `base`; mappings merge, everything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the global configuration.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp = path.with_file_name(format!("{CONFIG_FILE}.tmp"));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. Repository list
// ---------------------------------------------------------------------------

/// Register a repository root. Returns `false` if it was already listed.
pub fn add_repository_at(home: &Path, repo_root: PathBuf) -> Result<bool, ConfigError> {
    let mut config = load_at(home)?;
    if config.repositories.contains(&repo_root) {
        return Ok(false);
    }
    config.repositories.push(repo_root);
    config.repositories.sort();
    save_at(home, &config)?;
    Ok(true)
}

/// Unregister a repository root. Returns `false` if it was not listed.
pub fn remove_repository_at(home: &Path, repo_root: &Path) -> Result<bool, ConfigError> {
    let mut config = load_at(home)?;
    let before = config.repositories.len();
    config.repositories.retain(|r| r != repo_root);
    if config.repositories.len() == before {
        return Ok(false);
    }
    save_at(home, &config)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
pub(crate) fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
pub(crate) fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
