//! Daemon logging: a `tracing` subscriber plus size-based rotation.
//!
//! Events go to stderr in human-readable form and are appended as JSON lines
//! to `~/.autocommit/logs/daemon.log`. The file is reopened for every event,
//! so a rotation never leaves the subscriber writing to a renamed file.
//! When the log exceeds 10 MiB it is rotated, keeping at most 5 copies:
//!   daemon.log → daemon.log.1 → daemon.log.2 → … → daemon.log.5

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{io_err, DaemonError};
use crate::paths::{log_path, logs_dir};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// Also bridges records emitted through the `log` facade (the sync engine)
/// into `tracing`. A second call is a no-op.
pub fn init(home: &Path) -> Result<(), DaemonError> {
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(io::stderr).with_target(false);
    let file = fmt::layer()
        .json()
        .with_writer(LogFile::new(log_path(home)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init();
    Ok(())
}

/// Appends each event to the log file, opening it afresh every time.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

pub enum LogFileWriter {
    File(fs::File),
    Sink(io::Sink),
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogFileWriter::File(file) => file.write(buf),
            LogFileWriter::Sink(sink) => sink.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogFileWriter::File(file) => file.flush(),
            LogFileWriter::Sink(sink) => sink.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => LogFileWriter::File(file),
            Err(_) => LogFileWriter::Sink(io::sink()),
        }
    }
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

/// Rotate `path` once it has reached `max_bytes`.
///
/// `<name>.<max_files>` is dropped, every `<name>.<n>` moves to `<n+1>`, the
/// live file becomes `<name>.1` and an empty live file takes its place.
/// Returns whether a rotation happened; a missing file is not an error.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    match fs::remove_file(numbered_path(path, max_files)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..max_files).rev() {
        let from = numbered_path(path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(path, n + 1))?;
        }
    }
    fs::rename(path, numbered_path(path, 1))?;
    fs::File::create(path)?;
    Ok(true)
}

/// Rotate `daemon.log` under `home`. Failures are logged, never returned.
pub fn rotate_logs(home: &Path) {
    let log = log_path(home);
    match rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log.display(), "log file rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
    }
}

/// Build the path for the `n`-th rotated copy of `base` (e.g. `daemon.log.2`).
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("daemon.log");
    base.with_file_name(format!("{name}.{n}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
