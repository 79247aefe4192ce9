//! Enablement state machine and timer bookkeeping for every open repository.
//!
//! The [`Engine`] is owned by the control loop and never shared: every input
//! (filesystem events, socket commands, timer deadlines) is applied to it one
//! at a time. Work that touches the VCS is handed to the repository's
//! [`WorkerHandle`] and never awaited here, so the loop stays responsive.
//!
//! Enablement is re-evaluated eagerly for every repository whenever one of
//! its inputs changes: the process-wide flag, a branch, `excludeBranches`, or
//! the set of open repositories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use autocommit_core::enablement::{echo_persisted, should_attach, transition, BranchExclusions, Transition};
use autocommit_core::{branch_store, config, AutoPull, AutoPush, Config, RepoHandle, RepoId, StateStore};
use autocommit_sync::{CommitRequest, Orchestrator};

use crate::error::DaemonError;
use crate::paths::socket_path;
use crate::scheduler::{Scheduler, TimerKind};
use crate::watcher::{canonical_root, RepoWatcher};
use crate::worker::{Job, JobKind, WorkerHandle};

/// Inputs delivered to the control loop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineEvent {
    /// Something in the working tree changed.
    RepoChanged(RepoId),
    /// `.git/HEAD` moved; the branch may have changed.
    HeadChanged(RepoId),
    /// `None` is the global file, `Some` a repository overlay.
    ConfigChanged(Option<RepoId>),
    /// A worker finished a job.
    JobFinished {
        repo: RepoId,
        rearm: Option<TimerKind>,
    },
}

/// Reply to an explicit operation, resolved by the repository's worker.
pub type PendingReply = oneshot::Receiver<Result<Value, String>>;

struct RepoEntry {
    handle: RepoHandle,
    config: Arc<Config>,
    exclusions: BranchExclusions,
    worker: WorkerHandle,
}

pub struct Engine {
    home: PathBuf,
    global: Config,
    orchestrator: Arc<Orchestrator>,
    state: Arc<StateStore>,
    scheduler: Scheduler,
    repos: BTreeMap<RepoId, RepoEntry>,
    events: mpsc::UnboundedSender<EngineEvent>,
    watcher: Option<RepoWatcher>,
    started_at_unix: u64,
}

impl Engine {
    pub fn new(
        home: PathBuf,
        global: Config,
        orchestrator: Arc<Orchestrator>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let state = Arc::clone(orchestrator.state());
        Self {
            home,
            global,
            orchestrator,
            state,
            scheduler: Scheduler::new(),
            repos: BTreeMap::new(),
            events,
            watcher: None,
            started_at_unix: unix_seconds_now(),
        }
    }

    pub fn with_watcher(mut self, watcher: RepoWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn is_open(&self, repo: &RepoId) -> bool {
        self.repos.contains_key(repo)
    }

    pub fn is_attached(&self, repo: &RepoId) -> bool {
        self.state.repo(repo).is_some_and(|activity| activity.attached)
    }

    pub fn pending_timers(&self, repo: &RepoId) -> Vec<TimerKind> {
        self.scheduler.pending(repo)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    // -----------------------------------------------------------------------
    // Repository lifecycle
    // -----------------------------------------------------------------------

    /// Open every repository listed in the global configuration.
    pub async fn open_configured(&mut self) {
        for root in self.global.repositories.clone() {
            if let Err(err) = self.open(&root).await {
                tracing::warn!(path = %root.display(), error = %err, "could not open repository");
            }
        }
    }

    pub async fn open(&mut self, root: &Path) -> Result<RepoId, DaemonError> {
        let root = canonical_root(root);
        let handle = RepoHandle::new(root.clone());
        let id = handle.id();
        if self.repos.contains_key(&id) {
            return Ok(id);
        }

        let config = config::resolve_for_repo_at(&self.home, &root)?;
        let branch = match self.orchestrator.vcs().current_branch(&handle).await {
            Ok(branch) => branch,
            Err(err) => {
                tracing::warn!(repo = %id, error = %err, "could not read current branch");
                None
            }
        };

        self.state.register_repo(&id);
        self.state.set_branch(&id, branch.clone());
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(err) = watcher.watch_repo(&handle) {
                tracing::warn!(repo = %id, error = %err, "could not watch repository");
            }
        }
        let worker = WorkerHandle::spawn(
            Arc::clone(&self.orchestrator),
            handle.clone(),
            self.events.clone(),
        );
        self.repos.insert(
            id.clone(),
            RepoEntry {
                handle,
                exclusions: BranchExclusions::new(&config.exclude_branches),
                config: Arc::new(config),
                worker,
            },
        );
        tracing::info!(repo = %id, branch = ?branch, "repository opened");

        self.echo_persisted(&root, branch.as_deref());
        self.reconcile_all();
        Ok(id)
    }

    /// Close a repository. A final commit runs first when it is attached and
    /// `commitOnClose` is set; it completes in the background.
    pub fn close(&mut self, root: &Path) -> Result<(), DaemonError> {
        let id = self.lookup(root)?;
        if let Some(entry) = self.repos.remove(&id) {
            let _finishing = self.finish_repo(&id, entry);
        }
        tracing::info!(repo = %id, "repository closed");
        self.reconcile_all();
        Ok(())
    }

    /// Close every repository and wait for their workers to drain.
    pub async fn shutdown(&mut self) {
        let ids: Vec<RepoId> = self.repos.keys().cloned().collect();
        let mut draining = Vec::new();
        for id in ids {
            if let Some(entry) = self.repos.remove(&id) {
                draining.push(self.finish_repo(&id, entry));
            }
        }
        for handle in draining {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "repository worker join failure");
            }
        }
    }

    fn finish_repo(&mut self, id: &RepoId, entry: RepoEntry) -> JoinHandle<()> {
        self.scheduler.cancel_repo(id);
        if self.is_attached(id) && entry.config.commit_on_close {
            let job = Job {
                kind: JobKind::Commit(CommitRequest::on_close()),
                config: Arc::clone(&entry.config),
                generation: None,
                rearm: None,
                respond_to: None,
            };
            if let Err(err) = entry.worker.submit(job) {
                tracing::error!(repo = %id, error = %err, "could not queue final commit");
            }
        }
        self.state.set_attached(id, false);
        self.state.remove_repo(id);
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.unwatch_repo(&entry.handle);
        }
        entry.worker.close()
    }

    fn lookup(&self, root: &Path) -> Result<RepoId, DaemonError> {
        let id = RepoHandle::new(canonical_root(root)).id();
        if self.repos.contains_key(&id) {
            Ok(id)
        } else {
            Err(DaemonError::UnknownRepository {
                path: root.to_path_buf(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Enablement
    // -----------------------------------------------------------------------

    pub fn enable(&mut self, persist_for_branch: bool) -> Result<(), DaemonError> {
        self.set_enabled(true, persist_for_branch)
    }

    pub fn disable(&mut self, persist_for_branch: bool) -> Result<(), DaemonError> {
        self.set_enabled(false, persist_for_branch)
    }

    fn set_enabled(&mut self, enabled: bool, persist_for_branch: bool) -> Result<(), DaemonError> {
        if persist_for_branch {
            for (id, entry) in &self.repos {
                let Some(branch) = self.state.repo(id).and_then(|activity| activity.branch) else {
                    tracing::warn!(repo = %id, "detached HEAD, nothing to remember");
                    continue;
                };
                branch_store::set_at(&self.home, &entry.handle.root, &branch, enabled)?;
            }
        }
        if self.state.set_enabled(enabled) {
            tracing::info!(enabled, "auto-commit toggled");
        }
        self.reconcile_all();
        Ok(())
    }

    /// Apply the remembered flag for `(root, branch)`, if any.
    fn echo_persisted(&self, root: &Path, branch: Option<&str>) {
        let Some(branch) = branch else { return };
        match branch_store::get_at(&self.home, root, branch) {
            Ok(persisted) => {
                let enabled = echo_persisted(self.state.is_enabled(), persisted);
                if self.state.set_enabled(enabled) {
                    tracing::info!(branch, enabled, "applied remembered branch setting");
                }
            }
            Err(err) => tracing::warn!(branch, error = %err, "could not read branch store"),
        }
    }

    fn reconcile_all(&mut self) {
        let ids: Vec<RepoId> = self.repos.keys().cloned().collect();
        for id in ids {
            self.reconcile(&id);
        }
    }

    fn reconcile(&mut self, id: &RepoId) {
        let Some(entry) = self.repos.get(id) else {
            return;
        };
        let activity = self.state.repo(id).unwrap_or_default();
        let desired = should_attach(
            self.state.is_enabled(),
            activity.branch.as_deref(),
            &entry.exclusions,
        );
        match transition(activity.attached, desired) {
            Transition::Attach => self.attach(id),
            Transition::Detach => self.detach(id),
            Transition::Unchanged => {}
        }
    }

    fn attach(&mut self, id: &RepoId) {
        let Some(config) = self.repos.get(id).map(|entry| Arc::clone(&entry.config)) else {
            return;
        };
        self.state.set_attached(id, true);
        self.sync_intervals(id, &config, None);
        if config.pull_on_open {
            self.submit_automatic(id, JobKind::Pull, None);
        }
        tracing::info!(repo = %id, "scheduler attached");
    }

    fn detach(&mut self, id: &RepoId) {
        self.state.set_attached(id, false);
        self.scheduler.cancel_repo(id);
        if let Some(entry) = self.repos.get(id) {
            entry.worker.invalidate();
        }
        tracing::info!(repo = %id, "scheduler detached");
    }

    /// Arm the `afterDelay` intervals the configuration asks for and cancel
    /// the ones it no longer does. Armed intervals keep their deadline unless
    /// `previous` ran them with a different delay.
    fn sync_intervals(&mut self, id: &RepoId, config: &Config, previous: Option<&Config>) {
        let now = Instant::now();
        let wanted = [
            (
                TimerKind::Push,
                config.auto_push == AutoPush::AfterDelay,
                config.push_interval(),
            ),
            (
                TimerKind::Pull,
                config.auto_pull == AutoPull::AfterDelay,
                config.pull_interval(),
            ),
        ];
        for (kind, enabled, interval) in wanted {
            let stale = previous.is_some_and(|previous| match kind {
                TimerKind::Push => previous.push_interval() != interval,
                TimerKind::Pull => previous.pull_interval() != interval,
                TimerKind::Commit => false,
            });
            if !enabled {
                self.scheduler.cancel(id, kind);
            } else if stale || !self.scheduler.is_armed(id, kind) {
                self.scheduler.arm(id, kind, interval, now);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::RepoChanged(repo) => self.on_repo_changed(&repo),
            EngineEvent::HeadChanged(repo) => self.on_head_changed(&repo).await,
            EngineEvent::ConfigChanged(scope) => self.on_config_changed(scope).await,
            EngineEvent::JobFinished { repo, rearm } => self.on_job_finished(&repo, rearm),
        }
    }

    /// Debounce entry point: (re)arm the commit timer of an attached repository.
    pub fn on_repo_changed(&mut self, id: &RepoId) {
        if !self.is_attached(id) {
            return;
        }
        let Some(entry) = self.repos.get(id) else {
            return;
        };
        let delay = entry.config.commit_delay();
        self.scheduler.on_change(id, delay, Instant::now());
    }

    pub async fn on_head_changed(&mut self, id: &RepoId) {
        let Some(handle) = self.repos.get(id).map(|entry| entry.handle.clone()) else {
            return;
        };
        let branch = match self.orchestrator.vcs().current_branch(&handle).await {
            Ok(branch) => branch,
            Err(err) => {
                tracing::warn!(repo = %id, error = %err, "could not read current branch");
                return;
            }
        };
        if !self.state.set_branch(id, branch.clone()) {
            return;
        }
        tracing::info!(repo = %id, branch = ?branch, "branch changed");
        self.echo_persisted(&handle.root, branch.as_deref());
        self.reconcile_all();
    }

    pub async fn on_config_changed(&mut self, scope: Option<RepoId>) {
        if let Some(id) = scope {
            self.refresh_config(&id);
            self.reconcile(&id);
            // the overlay is itself part of the working tree
            self.on_repo_changed(&id);
            return;
        }

        let global = match config::load_at(&self.home) {
            Ok(global) => global,
            Err(err) => {
                tracing::warn!(error = %err, "keeping previous configuration");
                return;
            }
        };
        let previous = std::mem::replace(&mut self.global, global);
        tracing::info!("configuration reloaded");
        if previous.enabled != self.global.enabled {
            self.state.set_enabled(self.global.enabled);
        }

        let removed: Vec<PathBuf> = previous
            .repositories
            .iter()
            .filter(|root| !self.global.repositories.contains(root))
            .cloned()
            .collect();
        for root in removed {
            if let Err(err) = self.close(&root) {
                tracing::debug!(path = %root.display(), error = %err, "unlisted repository was not open");
            }
        }

        let ids: Vec<RepoId> = self.repos.keys().cloned().collect();
        for id in &ids {
            self.refresh_config(id);
        }

        let added: Vec<PathBuf> = self
            .global
            .repositories
            .iter()
            .filter(|root| !previous.repositories.contains(root))
            .cloned()
            .collect();
        for root in added {
            if let Err(err) = self.open(&root).await {
                tracing::warn!(path = %root.display(), error = %err, "could not open repository");
            }
        }
        self.reconcile_all();
    }

    fn refresh_config(&mut self, id: &RepoId) {
        let Some(entry) = self.repos.get_mut(id) else {
            return;
        };
        let previous = match config::resolve_for_repo_at(&self.home, &entry.handle.root) {
            Ok(config) => {
                entry.exclusions = BranchExclusions::new(&config.exclude_branches);
                std::mem::replace(&mut entry.config, Arc::new(config))
            }
            Err(err) => {
                tracing::warn!(repo = %id, error = %err, "keeping previous repository configuration");
                return;
            }
        };
        let config = Arc::clone(&entry.config);
        if self.is_attached(id) {
            self.sync_intervals(id, &config, Some(previous.as_ref()));
        }
    }

    /// Interval timers are re-armed only once their job has finished, so two
    /// runs of the same interval never overlap.
    fn on_job_finished(&mut self, id: &RepoId, rearm: Option<TimerKind>) {
        let Some(kind) = rearm else { return };
        if !self.is_attached(id) || self.scheduler.is_armed(id, kind) {
            return;
        }
        let Some(config) = self.repos.get(id).map(|entry| Arc::clone(&entry.config)) else {
            return;
        };
        let interval = match kind {
            TimerKind::Push if config.auto_push == AutoPush::AfterDelay => config.push_interval(),
            TimerKind::Pull if config.auto_pull == AutoPull::AfterDelay => config.pull_interval(),
            _ => return,
        };
        self.scheduler.arm(id, kind, interval, Instant::now());
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Hand every due timer to its repository's worker. Returns how many fired.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let due = self.scheduler.take_due(now);
        for (id, kind) in &due {
            let (job, rearm) = match kind {
                TimerKind::Commit => (JobKind::Commit(CommitRequest::automatic()), None),
                TimerKind::Push => (JobKind::Push, Some(TimerKind::Push)),
                TimerKind::Pull => (JobKind::Pull, Some(TimerKind::Pull)),
            };
            tracing::debug!(repo = %id, timer = ?kind, "timer fired");
            self.submit_automatic(id, job, rearm);
        }
        due.len()
    }

    fn submit_automatic(&self, id: &RepoId, kind: JobKind, rearm: Option<TimerKind>) {
        let Some(entry) = self.repos.get(id) else {
            return;
        };
        let job = Job {
            kind,
            config: Arc::clone(&entry.config),
            generation: Some(entry.worker.generation()),
            rearm,
            respond_to: None,
        };
        if let Err(err) = entry.worker.submit(job) {
            tracing::error!(repo = %id, error = %err, "could not queue job");
        }
    }

    // -----------------------------------------------------------------------
    // Explicit operations
    // -----------------------------------------------------------------------

    /// Commit now, regardless of enablement. A pending debounce commit is
    /// superseded.
    pub fn commit_now(
        &mut self,
        root: &Path,
        message: Option<String>,
    ) -> Result<PendingReply, DaemonError> {
        let id = self.lookup(root)?;
        self.scheduler.cancel(&id, TimerKind::Commit);
        self.submit_explicit(&id, JobKind::Commit(CommitRequest::manual(message)))
    }

    pub fn squash(
        &self,
        root: &Path,
        count: usize,
        message: Option<String>,
    ) -> Result<PendingReply, DaemonError> {
        let id = self.lookup(root)?;
        self.submit_explicit(&id, JobKind::Squash { count, message })
    }

    pub fn undo(&self, root: &Path, reference: Option<String>) -> Result<PendingReply, DaemonError> {
        let id = self.lookup(root)?;
        self.submit_explicit(&id, JobKind::Undo { reference })
    }

    pub fn restore(
        &self,
        root: &Path,
        reference: String,
        path: PathBuf,
    ) -> Result<PendingReply, DaemonError> {
        let id = self.lookup(root)?;
        self.submit_explicit(&id, JobKind::Restore { reference, path })
    }

    fn submit_explicit(&self, id: &RepoId, kind: JobKind) -> Result<PendingReply, DaemonError> {
        let entry = self
            .repos
            .get(id)
            .ok_or_else(|| DaemonError::UnknownRepository {
                path: PathBuf::from(&id.0),
            })?;
        let (job, reply) = Job::explicit(kind, Arc::clone(&entry.config));
        entry.worker.submit(job)?;
        Ok(reply)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> Value {
        let repositories: Vec<Value> = self
            .repos
            .keys()
            .map(|id| {
                let activity = self.state.repo(id).unwrap_or_default();
                json!({
                    "repo": id.0,
                    "branch": activity.branch,
                    "attached": activity.attached,
                    "pulling": activity.pulling,
                    "pushing": activity.pushing,
                    "timers": self.scheduler.pending(id),
                })
            })
            .collect();

        json!({
            "running": true,
            "enabled": self.state.is_enabled(),
            "started_at_unix": self.started_at_unix,
            "socket": socket_path(&self.home).display().to_string(),
            "repositories": repositories,
        })
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
