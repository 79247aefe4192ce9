//! Per-repository timers.
//!
//! One deadline per `(repository, kind)`. Arming a kind that is already armed
//! replaces its deadline, so a stream of changes spaced closer than the delay
//! keeps pushing the commit deadline out (coalescing debounce). The control
//! loop sleeps until [`Scheduler::next_deadline`] and then drains
//! [`Scheduler::take_due`]; nothing fires outside that drain.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use autocommit_core::RepoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    /// Quiescence delay before an automatic commit.
    Commit,
    /// `autoPush: afterDelay` interval.
    Push,
    /// `autoPull: afterDelay` interval.
    Pull,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<(RepoId, TimerKind), Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a working-tree change. Returns `true` if a pending commit
    /// deadline was replaced.
    pub fn on_change(&mut self, repo: &RepoId, delay: Duration, now: Instant) -> bool {
        self.arm(repo, TimerKind::Commit, delay, now).is_some()
    }

    /// Arm (or re-arm) a timer; returns the deadline it replaced.
    pub fn arm(
        &mut self,
        repo: &RepoId,
        kind: TimerKind,
        delay: Duration,
        now: Instant,
    ) -> Option<Instant> {
        self.deadlines.insert((repo.clone(), kind), now + delay)
    }

    pub fn cancel(&mut self, repo: &RepoId, kind: TimerKind) -> bool {
        self.deadlines.remove(&(repo.clone(), kind)).is_some()
    }

    /// Cancel every timer of `repo`; returns how many were pending.
    pub fn cancel_repo(&mut self, repo: &RepoId) -> usize {
        let before = self.deadlines.len();
        self.deadlines.retain(|(id, _), _| id != repo);
        before - self.deadlines.len()
    }

    pub fn is_armed(&self, repo: &RepoId, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&(repo.clone(), kind))
    }

    pub fn deadline(&self, repo: &RepoId, kind: TimerKind) -> Option<Instant> {
        self.deadlines.get(&(repo.clone(), kind)).copied()
    }

    pub fn pending(&self, repo: &RepoId) -> Vec<TimerKind> {
        let mut kinds: Vec<TimerKind> = self
            .deadlines
            .keys()
            .filter(|(id, _)| id == repo)
            .map(|(_, kind)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(RepoId, TimerKind)> {
        let mut due: Vec<(Instant, RepoId, TimerKind)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|((repo, kind), deadline)| (*deadline, repo.clone(), *kind))
            .collect();
        due.sort();
        for (_, repo, kind) in &due {
            self.deadlines.remove(&(repo.clone(), *kind));
        }
        due.into_iter().map(|(_, repo, kind)| (repo, kind)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
