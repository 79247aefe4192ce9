//! Filesystem watcher feeding the control loop.
//!
//! One `notify` watcher covers every open repository (recursive) and the
//! `~/.autocommit` directory (non-recursive). Raw paths are classified into
//! [`EngineEvent`]s on the notify thread:
//!
//! | path                              | event                     |
//! |-----------------------------------|---------------------------|
//! | `<repo>/.git/HEAD`                | `HeadChanged(repo)`       |
//! | `<repo>/.git/**` (anything else)  | ignored                   |
//! | `<repo>/.autocommit.yaml`         | `ConfigChanged(Some(repo))` |
//! | `<repo>/**`                       | `RepoChanged(repo)`       |
//! | `~/.autocommit/config.yaml`       | `ConfigChanged(None)`     |

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use autocommit_core::config::{CONFIG_FILE, REPO_OVERLAY_FILE};
use autocommit_core::{RepoHandle, RepoId};

use crate::engine::EngineEvent;
use crate::error::{io_err, DaemonError};

#[derive(Debug, Default)]
pub(crate) struct WatchTable {
    roots: BTreeMap<PathBuf, RepoId>,
    config_dir: PathBuf,
}

impl WatchTable {
    pub(crate) fn new(config_dir: PathBuf) -> Self {
        Self {
            roots: BTreeMap::new(),
            config_dir,
        }
    }

    pub(crate) fn insert(&mut self, root: PathBuf, repo: RepoId) {
        self.roots.insert(root, repo);
    }

    pub(crate) fn remove(&mut self, root: &Path) {
        self.roots.remove(root);
    }

    /// The deepest registered root containing `path`, so a nested repository
    /// wins over its parent.
    fn owner(&self, path: &Path) -> Option<(&Path, &RepoId)> {
        self.roots
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(root, repo)| (root.as_path(), repo))
    }

    pub(crate) fn classify(&self, path: &Path) -> Option<EngineEvent> {
        if path.parent() == Some(self.config_dir.as_path()) {
            return (path.file_name() == Some(OsStr::new(CONFIG_FILE)))
                .then_some(EngineEvent::ConfigChanged(None));
        }

        let (root, repo) = self.owner(path)?;
        let relative = path.strip_prefix(root).ok()?;
        let mut components = relative.components();
        match components.next() {
            None => None,
            Some(Component::Normal(first)) if first == ".git" => {
                let rest: PathBuf = components.collect();
                (rest == Path::new("HEAD")).then(|| EngineEvent::HeadChanged(repo.clone()))
            }
            Some(_) if relative == Path::new(REPO_OVERLAY_FILE) => {
                Some(EngineEvent::ConfigChanged(Some(repo.clone())))
            }
            Some(_) => Some(EngineEvent::RepoChanged(repo.clone())),
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Canonicalize so that paths reported by the OS (e.g. `/private/var/...`
/// on macOS) match the registered roots.
pub(crate) fn canonical_root(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn lock(table: &Mutex<WatchTable>) -> MutexGuard<'_, WatchTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Live subscription to repository changes. Dropping it stops every watch.
pub struct RepoWatcher {
    watcher: RecommendedWatcher,
    table: Arc<Mutex<WatchTable>>,
}

impl RepoWatcher {
    pub fn new(
        config_dir: &Path,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self, DaemonError> {
        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir).map_err(|e| io_err(config_dir, e))?;
        }
        let config_dir = canonical_root(config_dir);
        let table = Arc::new(Mutex::new(WatchTable::new(config_dir.clone())));

        let callback_table = Arc::clone(&table);
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "watcher event error");
                    return;
                }
            };
            if !is_relevant_event_kind(&event.kind) {
                return;
            }
            let classified: BTreeSet<EngineEvent> = {
                let table = lock(&callback_table);
                event.paths.iter().filter_map(|p| table.classify(p)).collect()
            };
            for engine_event in classified {
                let _ = events.send(engine_event);
            }
        })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %config_dir.display(), "watching configuration directory");
        Ok(Self { watcher, table })
    }

    pub fn watch_repo(&mut self, repo: &RepoHandle) -> Result<(), DaemonError> {
        let root = canonical_root(&repo.root);
        self.watcher.watch(&root, RecursiveMode::Recursive)?;
        lock(&self.table).insert(root.clone(), repo.id());
        tracing::debug!(repo = %repo.id(), path = %root.display(), "watching repository");
        Ok(())
    }

    pub fn unwatch_repo(&mut self, repo: &RepoHandle) {
        let root = canonical_root(&repo.root);
        lock(&self.table).remove(&root);
        if let Err(err) = self.watcher.unwatch(&root) {
            tracing::debug!(repo = %repo.id(), error = %err, "unwatch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> WatchTable {
        let mut table = WatchTable::new(PathBuf::from("/home/u/.autocommit"));
        table.insert(PathBuf::from("/work/notes"), RepoId::from("/work/notes"));
        table.insert(
            PathBuf::from("/work/notes/vendor/lib"),
            RepoId::from("/work/notes/vendor/lib"),
        );
        table
    }

    #[test]
    fn working_tree_paths_are_repo_changes() {
        assert_eq!(
            table().classify(Path::new("/work/notes/docs/a.md")),
            Some(EngineEvent::RepoChanged(RepoId::from("/work/notes")))
        );
    }

    #[test]
    fn nested_root_wins_over_parent() {
        assert_eq!(
            table().classify(Path::new("/work/notes/vendor/lib/src/x.rs")),
            Some(EngineEvent::RepoChanged(RepoId::from(
                "/work/notes/vendor/lib"
            )))
        );
    }

    #[test]
    fn head_moves_are_branch_changes_and_other_git_internals_are_ignored() {
        let table = table();
        assert_eq!(
            table.classify(Path::new("/work/notes/.git/HEAD")),
            Some(EngineEvent::HeadChanged(RepoId::from("/work/notes")))
        );
        assert_eq!(table.classify(Path::new("/work/notes/.git/index")), None);
        assert_eq!(
            table.classify(Path::new("/work/notes/.git/refs/heads/main")),
            None
        );
    }

    #[test]
    fn configuration_files_are_config_changes() {
        let table = table();
        assert_eq!(
            table.classify(Path::new("/work/notes/.autocommit.yaml")),
            Some(EngineEvent::ConfigChanged(Some(RepoId::from("/work/notes"))))
        );
        assert_eq!(
            table.classify(Path::new("/home/u/.autocommit/config.yaml")),
            Some(EngineEvent::ConfigChanged(None))
        );
        assert_eq!(
            table.classify(Path::new("/home/u/.autocommit/config.yaml.tmp")),
            None
        );
    }

    #[test]
    fn unrelated_paths_are_dropped() {
        assert_eq!(table().classify(Path::new("/tmp/scratch.txt")), None);
        assert_eq!(table().classify(Path::new("/work/notes")), None);
    }
}
