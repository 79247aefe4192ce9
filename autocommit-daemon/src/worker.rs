//! Per-repository sequential worker.
//!
//! Every VCS-touching job for one repository (automatic commits, interval
//! pushes and pulls, explicit history operations) runs on that repository's
//! worker task, one at a time, so commit → push → pull never overlap for a
//! handle while different repositories proceed independently.
//!
//! Automatic jobs carry the attach generation they were scheduled under.
//! Detaching bumps the generation, so a job queued before the detach is
//! dropped instead of firing late.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use autocommit_core::{Config, RepoHandle, RepoId};
use autocommit_sync::{CommitOutcome, CommitRequest, Orchestrator};

use crate::engine::EngineEvent;
use crate::error::DaemonError;
use crate::scheduler::TimerKind;

pub(crate) type JobResult = Result<Value, String>;

#[derive(Debug, Clone)]
pub(crate) enum JobKind {
    Commit(CommitRequest),
    Push,
    Pull,
    Squash {
        count: usize,
        message: Option<String>,
    },
    Undo {
        reference: Option<String>,
    },
    Restore {
        reference: String,
        path: PathBuf,
    },
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Commit(_) => "commit",
            JobKind::Push => "push",
            JobKind::Pull => "pull",
            JobKind::Squash { .. } => "squash",
            JobKind::Undo { .. } => "undo",
            JobKind::Restore { .. } => "restore",
        }
    }
}

pub(crate) struct Job {
    pub kind: JobKind,
    pub config: Arc<Config>,
    /// `Some` for automatic jobs; checked against the worker's generation.
    pub generation: Option<u64>,
    /// Interval timer to re-arm once this job has finished.
    pub rearm: Option<TimerKind>,
    pub respond_to: Option<oneshot::Sender<JobResult>>,
}

impl Job {
    pub(crate) fn explicit(kind: JobKind, config: Arc<Config>) -> (Self, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            kind,
            config,
            generation: None,
            rearm: None,
            respond_to: Some(tx),
        };
        (job, rx)
    }
}

pub(crate) struct WorkerHandle {
    jobs: mpsc::UnboundedSender<Job>,
    generation: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        orchestrator: Arc<Orchestrator>,
        repo: RepoHandle,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(worker_task(
            orchestrator,
            repo,
            rx,
            Arc::clone(&generation),
            events,
        ));
        Self {
            jobs,
            generation,
            task,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate every queued automatic job.
    pub(crate) fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), DaemonError> {
        self.jobs
            .send(job)
            .map_err(|_| DaemonError::ChannelClosed("repository worker"))
    }

    /// Stop accepting jobs. Queued explicit jobs still run; queued automatic
    /// jobs are dropped. The returned handle resolves once the queue is empty.
    pub(crate) fn close(self) -> JoinHandle<()> {
        self.invalidate();
        drop(self.jobs);
        self.task
    }
}

async fn worker_task(
    orchestrator: Arc<Orchestrator>,
    repo: RepoHandle,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let id = repo.id();
    while let Some(job) = jobs.recv().await {
        if let Some(scheduled) = job.generation {
            if scheduled != generation.load(Ordering::SeqCst) {
                tracing::debug!(repo = %id, job = job.kind.label(), "dropping job scheduled before detach");
                continue;
            }
        }

        let label = job.kind.label();
        let result = run_job(&orchestrator, &repo, &job).await;
        match &result {
            Ok(_) => tracing::debug!(repo = %id, job = label, "job finished"),
            Err(err) => tracing::error!(repo = %id, job = label, error = %err, "job failed"),
        }

        if let Some(respond_to) = job.respond_to {
            let _ = respond_to.send(result);
        }
        let _ = events.send(EngineEvent::JobFinished {
            repo: id.clone(),
            rearm: job.rearm,
        });
    }
    tracing::debug!(repo = %id, "worker stopped");
}

async fn run_job(orchestrator: &Orchestrator, repo: &RepoHandle, job: &Job) -> JobResult {
    let config = job.config.as_ref();
    match &job.kind {
        JobKind::Commit(request) => {
            let outcome = orchestrator
                .commit(repo, config, request.clone())
                .await
                .map_err(|err| err.to_string())?;
            log_commit(&repo.id(), &outcome);
            to_value(&outcome)
        }
        JobKind::Push => to_value(&orchestrator.push(repo, config).await),
        JobKind::Pull => to_value(&orchestrator.pull(repo).await),
        JobKind::Squash { count, message } => orchestrator
            .squash_last(repo, config, *count, message.clone())
            .await
            .map_err(|err| err.to_string())
            .and_then(|outcome| to_value(&outcome)),
        JobKind::Undo { reference } => orchestrator
            .undo(repo, config, reference.as_deref())
            .await
            .map_err(|err| err.to_string())
            .and_then(|outcome| to_value(&outcome)),
        JobKind::Restore { reference, path } => orchestrator
            .restore(repo, config, reference, path)
            .await
            .map_err(|err| err.to_string())
            .and_then(|outcome| to_value(&outcome)),
    }
}

fn log_commit(repo: &RepoId, outcome: &CommitOutcome) {
    match outcome {
        CommitOutcome::Committed { message, sync, .. } => {
            tracing::info!(repo = %repo, message = %message, sync = ?sync, "committed");
        }
        CommitOutcome::Ineligible { blocking } => {
            tracing::info!(repo = %repo, blocking = blocking.len(), "commit skipped: blocking diagnostics");
        }
        other => tracing::debug!(repo = %repo, outcome = ?other, "nothing to commit"),
    }
}

fn to_value(value: &impl serde::Serialize) -> JobResult {
    serde_json::to_value(value).map_err(|err| err.to_string())
}
