use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_LOG: &str = "daemon.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

/// How often the log file size is checked for rotation.
pub const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub fn autocommit_root(home: &Path) -> PathBuf {
    autocommit_core::config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    autocommit_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    autocommit_root(home).join("logs")
}

pub fn log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}
