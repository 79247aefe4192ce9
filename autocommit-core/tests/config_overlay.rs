use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use autocommit_core::config::{self, Config};
use autocommit_core::{AutoPull, AutoPush, PushMode, ValidationLevel};

#[test]
fn repo_overlay_wins_over_global_file() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");

    home.child(".autocommit/config.yaml")
        .write_str(
            "autoCommitDelay: 5000\nautoPush: onCommit\npushMode: push\nexcludeBranches: [main]\n",
        )
        .expect("write global");
    repo.child(".autocommit.yaml")
        .write_str("autoPush: off\ncommitValidationLevel: none\n")
        .expect("write overlay");

    let effective = config::resolve_for_repo_at(home.path(), repo.path()).expect("resolve");
    assert_eq!(effective.auto_commit_delay, 5000);
    assert_eq!(effective.auto_push, AutoPush::Off);
    assert_eq!(effective.push_mode, PushMode::Push);
    assert_eq!(effective.commit_validation_level, ValidationLevel::None);
    assert_eq!(effective.exclude_branches, vec!["main".to_string()]);
    assert_eq!(effective.auto_pull, AutoPull::OnPush);
}

#[test]
fn no_files_means_defaults() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let effective = config::resolve_for_repo_at(home.path(), repo.path()).expect("resolve");
    assert_eq!(effective, Config::default());
}

#[test]
fn overlay_parse_error_names_overlay_file() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    repo.child(".autocommit.yaml")
        .write_str("autoCommitDelay: soon\n")
        .expect("write overlay");

    let err = config::resolve_for_repo_at(home.path(), repo.path()).unwrap_err();
    assert!(err.to_string().contains(".autocommit.yaml"), "{err}");
}

#[test]
fn save_creates_private_config_file() {
    let home = TempDir::new().expect("home");
    config::save_at(home.path(), &Config::default()).expect("save");
    home.child(".autocommit/config.yaml")
        .assert(predicate::path::is_file());
    home.child(".autocommit/config.yaml")
        .assert(predicate::str::contains("autoCommitDelay: 30000"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(config::config_path_at(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
