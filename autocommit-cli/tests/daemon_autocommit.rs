use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use autocommit_core::{config, AutoPull, Config};

fn autocommit_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_autocommit") {
        return PathBuf::from(path);
    }

    let this_test = std::env::current_exe().expect("current_exe");
    let deps_dir = this_test.parent().expect("deps dir");
    let debug_dir = deps_dir.parent().expect("debug dir");
    debug_dir.join("autocommit")
}

fn with_git_env(cmd: &mut Command, home: &Path) {
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com");
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let mut cmd = Command::new(&binary);
        with_git_env(&mut cmd, &home);
        let child = cmd
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = Command::new(&self.binary)
            .env("HOME", &self.home)
            .env("USERPROFILE", &self.home)
            .args(["daemon", "stop"])
            .status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn daemon_status(binary: &Path, home: &Path) -> Option<serde_json::Value> {
    let output = Command::new(binary)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(["daemon", "status"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn daemon_running(binary: &Path, home: &Path) -> bool {
    daemon_status(binary, home)
        .and_then(|status| status.get("running").and_then(|v| v.as_bool()))
        .unwrap_or(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn git(home: &Path, repo: &Path, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new("git");
    with_git_env(&mut cmd, home);
    let output = cmd.current_dir(repo).args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).to_string())
}

#[test]
fn file_edit_in_registered_repository_is_committed_by_daemon() {
    let home = TempDir::new().expect("home");
    let workspace = TempDir::new().expect("workspace");
    let repo = fs::canonicalize(workspace.path()).expect("canonical repo");
    if git(home.path(), &repo, &["init", "--quiet"]).is_none() {
        return;
    }
    fs::write(repo.join("notes.md"), "first\n").expect("write");
    git(home.path(), &repo, &["add", "--all"]).expect("git add");
    git(home.path(), &repo, &["commit", "--quiet", "-m", "Initial"]).expect("git commit");

    let global = Config {
        enabled: true,
        auto_commit_delay: 300,
        auto_pull: AutoPull::Off,
        pull_on_open: false,
        repositories: vec![repo.clone()],
        ..Config::default()
    };
    config::save_at(home.path(), &global).expect("save config");

    let binary = autocommit_bin_path();
    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(5), || daemon_running(&binary, home.path())),
        "daemon did not report running state in time",
    );

    let attached = wait_until(Duration::from_secs(5), || {
        daemon_status(&binary, home.path())
            .and_then(|status| status["repositories"][0]["attached"].as_bool())
            .unwrap_or(false)
    });
    assert!(attached, "registered repository was not attached");

    fs::write(repo.join("notes.md"), "second\n").expect("edit");

    let committed = wait_until(Duration::from_secs(10), || {
        git(home.path(), &repo, &["rev-list", "--count", "HEAD"])
            .map(|count| count.trim() == "2")
            .unwrap_or(false)
    });
    assert!(committed, "daemon did not commit the edit within timeout");
    assert_eq!(
        git(home.path(), &repo, &["status", "--porcelain"]).as_deref(),
        Some("")
    );

    daemon.stop();
}
