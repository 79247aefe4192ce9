//! Process-wide engine state with synchronous change notification.
//!
//! The enablement flag and the per-repository sync activity flags live here
//! and are mutated only through [`StateStore`] methods. Subscribers register
//! against a [`StateField`] and are invoked synchronously, in registration
//! order, after each effective change. Callbacks run with the internal lock
//! released, so they may read the store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::types::RepoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Enabled,
    Branch,
    Attached,
    Pulling,
    Pushing,
}

/// In-flight network activity for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Pulling,
    Pushing,
}

impl Activity {
    fn field(self) -> StateField {
        match self {
            Activity::Pulling => StateField::Pulling,
            Activity::Pushing => StateField::Pushing,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoActivity {
    pub branch: Option<String>,
    pub attached: bool,
    pub pulling: bool,
    pub pushing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineState {
    pub enabled: bool,
    pub repos: BTreeMap<RepoId, RepoActivity>,
}

/// What changed, handed to subscribers along with the new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub field: StateField,
    pub repo: Option<RepoId>,
}

type Callback = Arc<dyn Fn(&StateChange, &EngineState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    field: StateField,
    callback: Callback,
}

struct Inner {
    state: EngineState,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

pub struct StateStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.snapshot())
            .finish()
    }
}

impl StateStore {
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: EngineState {
                    enabled,
                    repos: BTreeMap::new(),
                },
                subscribers: Vec::new(),
                next_id: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> EngineState {
        self.lock().state.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().state.enabled
    }

    pub fn repo(&self, repo: &RepoId) -> Option<RepoActivity> {
        self.lock().state.repos.get(repo).cloned()
    }

    pub fn subscribe(
        &self,
        field: StateField,
        callback: impl Fn(&StateChange, &EngineState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            field,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|s| s.id != id);
    }

    /// Returns `true` when the flag actually changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.mutate(StateField::Enabled, None, |state| {
            let changed = state.enabled != enabled;
            state.enabled = enabled;
            changed
        })
    }

    pub fn register_repo(&self, repo: &RepoId) {
        self.lock().state.repos.entry(repo.clone()).or_default();
    }

    pub fn remove_repo(&self, repo: &RepoId) {
        self.lock().state.repos.remove(repo);
    }

    pub fn set_branch(&self, repo: &RepoId, branch: Option<String>) -> bool {
        self.mutate(StateField::Branch, Some(repo), |state| {
            let entry = state.repos.entry(repo.clone()).or_default();
            let changed = entry.branch != branch;
            entry.branch = branch;
            changed
        })
    }

    pub fn set_attached(&self, repo: &RepoId, attached: bool) -> bool {
        self.mutate(StateField::Attached, Some(repo), |state| {
            let entry = state.repos.entry(repo.clone()).or_default();
            let changed = entry.attached != attached;
            entry.attached = attached;
            changed
        })
    }

    pub fn is_active(&self, repo: &RepoId, activity: Activity) -> bool {
        self.lock()
            .state
            .repos
            .get(repo)
            .is_some_and(|entry| match activity {
                Activity::Pulling => entry.pulling,
                Activity::Pushing => entry.pushing,
            })
    }

    /// Check-and-set an activity flag.
    ///
    /// Returns `None` if the activity is already in flight for `repo`. The
    /// returned guard clears the flag when dropped, on every exit path.
    pub fn begin(self: &Arc<Self>, repo: &RepoId, activity: Activity) -> Option<ActivityGuard> {
        let started = self.mutate(activity.field(), Some(repo), |state| {
            let entry = state.repos.entry(repo.clone()).or_default();
            let flag = match activity {
                Activity::Pulling => &mut entry.pulling,
                Activity::Pushing => &mut entry.pushing,
            };
            if *flag {
                return false;
            }
            *flag = true;
            true
        });
        started.then(|| ActivityGuard {
            store: Arc::clone(self),
            repo: repo.clone(),
            activity,
        })
    }

    fn finish(&self, repo: &RepoId, activity: Activity) {
        self.mutate(activity.field(), Some(repo), |state| {
            let Some(entry) = state.repos.get_mut(repo) else {
                return false;
            };
            let flag = match activity {
                Activity::Pulling => &mut entry.pulling,
                Activity::Pushing => &mut entry.pushing,
            };
            let changed = *flag;
            *flag = false;
            changed
        });
    }

    /// Apply `change`; if it reports a change, notify subscribers of `field`.
    fn mutate(
        &self,
        field: StateField,
        repo: Option<&RepoId>,
        change: impl FnOnce(&mut EngineState) -> bool,
    ) -> bool {
        let (changed, snapshot, callbacks) = {
            let mut inner = self.lock();
            if !change(&mut inner.state) {
                return false;
            }
            let callbacks: Vec<Callback> = inner
                .subscribers
                .iter()
                .filter(|s| s.field == field)
                .map(|s| Arc::clone(&s.callback))
                .collect();
            (true, inner.state.clone(), callbacks)
        };

        let event = StateChange {
            field,
            repo: repo.cloned(),
        };
        for callback in callbacks {
            callback(&event, &snapshot);
        }
        changed
    }
}

/// Clears its activity flag on drop.
#[derive(Debug)]
pub struct ActivityGuard {
    store: Arc<StateStore>,
    repo: RepoId,
    activity: Activity,
}

impl ActivityGuard {
    pub fn activity(&self) -> Activity {
        self.activity
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.store.finish(&self.repo, self.activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn repo() -> RepoId {
        RepoId::from("/work/notes")
    }

    #[test]
    fn begin_is_exclusive_per_activity_and_released_on_drop() {
        let store = StateStore::new(true);
        let guard = store.begin(&repo(), Activity::Pushing).expect("first push");
        assert!(store.begin(&repo(), Activity::Pushing).is_none());
        assert!(store.begin(&repo(), Activity::Pulling).is_some());
        assert!(store.is_active(&repo(), Activity::Pushing));
        drop(guard);
        assert!(!store.is_active(&repo(), Activity::Pushing));
        assert!(store.begin(&repo(), Activity::Pushing).is_some());
    }

    #[test]
    fn subscribers_fire_in_registration_order_on_effective_change() {
        let store = StateStore::new(false);
        let log = Arc::new(StdMutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            store.subscribe(StateField::Enabled, move |_, state| {
                log.lock().unwrap().push(format!("{tag}:{}", state.enabled));
            });
        }

        assert!(store.set_enabled(true));
        assert!(!store.set_enabled(true), "no-op must not notify");
        assert_eq!(*log.lock().unwrap(), vec!["first:true", "second:true"]);
    }

    #[test]
    fn activity_notifications_carry_repo_and_can_read_store() {
        let store = StateStore::new(true);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            let reader = Arc::clone(&store);
            store.subscribe(StateField::Pulling, move |change, state| {
                let pulling = state.repos[change.repo.as_ref().unwrap()].pulling;
                // re-entrant read must not deadlock
                let _ = reader.is_enabled();
                seen.lock().unwrap().push(pulling);
            });
        }
        let guard = store.begin(&repo(), Activity::Pulling);
        drop(guard);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = StateStore::new(false);
        let count = Arc::new(StdMutex::new(0));
        let id = {
            let count = Arc::clone(&count);
            store.subscribe(StateField::Enabled, move |_, _| *count.lock().unwrap() += 1)
        };
        store.set_enabled(true);
        store.unsubscribe(id);
        store.set_enabled(false);
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
