//! Ordered registry of agent sessions
//!
//! The registry is the single owner of session state. Readers get cloned
//! snapshots; writers go through typed patches or named transitions.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::types::{
    AgentId, AgentSession, Result, SessionPatch, SessionStatus, SonarError, Transition,
};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification published after every registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Created(AgentId),
    Updated(AgentId),
    Removed(AgentId),
}

impl RegistryChange {
    /// Session the change refers to
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Removed(id) => id,
        }
    }
}

/// Process-wide store of live sessions
///
/// Sessions are kept in insertion order. The internal lock is only held for
/// the duration of one synchronous mutation, so it is safe to share the
/// registry between async tasks behind an `Arc`.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<Vec<AgentSession>>,
    next_id: AtomicU64,
    changes: broadcast::Sender<RegistryChange>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            sessions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            changes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<AgentSession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<AgentSession>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, change: RegistryChange) {
        // No subscribers is fine
        drop(self.changes.send(change));
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    /// Append a fresh idle session and return its id
    pub fn create(&self) -> AgentId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = AgentId::from_sequence(n);
        self.write().push(AgentSession::new(id.clone()));
        tracing::debug!(agent_id = %id, "Session created");
        self.publish(RegistryChange::Created(id.clone()));
        id
    }

    /// Remove a session
    ///
    /// Does not touch the backing process; callers kill it first.
    pub fn remove(&self, id: &AgentId) -> Option<AgentSession> {
        let removed = {
            let mut sessions = self.write();
            let index = sessions.iter().position(|s| &s.id == id)?;
            sessions.remove(index)
        };
        tracing::debug!(agent_id = %id, "Session removed");
        self.publish(RegistryChange::Removed(id.clone()));
        Some(removed)
    }

    /// Snapshot of one session
    pub fn get(&self, id: &AgentId) -> Option<AgentSession> {
        self.read().iter().find(|s| &s.id == id).cloned()
    }

    /// Check if a session exists
    pub fn contains(&self, id: &AgentId) -> bool {
        self.read().iter().any(|s| &s.id == id)
    }

    /// Apply a patch; `false` if the session does not exist
    pub fn update(&self, id: &AgentId, patch: SessionPatch) -> bool {
        if patch.is_empty() {
            return self.contains(id);
        }
        self.with_session_mut(id, |session| {
            let merged = patch.merge(session.clone());
            *session = merged;
        })
        .is_some()
    }

    /// Snapshots of all sessions in insertion order
    pub fn list_ordered(&self) -> Vec<AgentSession> {
        self.read().clone()
    }

    /// Ids of all sessions in insertion order
    pub fn ids(&self) -> Vec<AgentId> {
        self.read().iter().map(|s| s.id.clone()).collect()
    }

    /// Mutate a session in place under the write lock
    ///
    /// Publishes an update when the session exists.
    pub(crate) fn with_session_mut<F, R>(&self, id: &AgentId, f: F) -> Option<R>
    where
        F: FnOnce(&mut AgentSession) -> R,
    {
        let result = {
            let mut sessions = self.write();
            let session = sessions.iter_mut().find(|s| &s.id == id)?;
            f(session)
        };
        self.publish(RegistryChange::Updated(id.clone()));
        Some(result)
    }

    fn transition<F>(&self, id: &AgentId, transition: Transition, f: F) -> Result<AgentSession>
    where
        F: FnOnce(&mut AgentSession),
    {
        let snapshot = {
            let mut sessions = self.write();
            let session = sessions
                .iter_mut()
                .find(|s| &s.id == id)
                .ok_or_else(|| SonarError::session_not_found(id))?;
            let Some(next) = session.status.apply(transition) else {
                return Err(SonarError::InvalidTransition {
                    id: id.clone(),
                    from: session.status,
                    action: transition.action(),
                });
            };
            f(session);
            session.status = next;
            session.clone()
        };
        tracing::debug!(
            agent_id = %id,
            action = transition.action(),
            status = %snapshot.status,
            "Session transition"
        );
        self.publish(RegistryChange::Updated(id.clone()));
        Ok(snapshot)
    }

    /// Explicit start of a fresh task: reset accumulators, enter `running`
    pub fn start(
        &self,
        id: &AgentId,
        task: impl Into<String>,
        working_dir: PathBuf,
        now: u64,
    ) -> Result<AgentSession> {
        let task = task.into();
        self.transition(id, Transition::Start, |session| {
            session.begin_run(task, working_dir, now);
        })
    }

    /// Finish a run normally; the duration freezes at `now`
    pub fn stop(&self, id: &AgentId, now: u64) -> Result<AgentSession> {
        self.transition(id, Transition::Stop, |session| {
            session.duration = session.elapsed_at(now);
        })
    }

    /// Finish a run abnormally; the duration freezes at `now`
    pub fn fail(&self, id: &AgentId, now: u64) -> Result<AgentSession> {
        self.transition(id, Transition::Fail, |session| {
            session.duration = session.elapsed_at(now);
        })
    }

    /// Record an anomaly signal and move to `warning`
    pub fn flag_anomaly(&self, id: &AgentId, estimated_savings: f64) -> Result<AgentSession> {
        self.transition(id, Transition::Anomaly, |session| {
            session.is_looping = true;
            session.estimated_savings = estimated_savings;
        })
    }

    /// Mark an idle session as discovered running; `None` if absent
    ///
    /// Accumulators are kept. A session that is already past `idle` only
    /// gets its task filled in when it has none.
    pub fn detect(&self, id: &AgentId, task: &str, now: u64) -> Option<AgentSession> {
        self.with_session_mut(id, |session| {
            if let Some(next) = session.status.apply(Transition::Detect) {
                session.status = next;
                session.started_at = now;
                session.duration = 0;
                session.task = task.to_string();
            } else if session.task.is_empty() {
                session.task = task.to_string();
            }
            session.clone()
        })
    }

    /// Recompute `duration` of every active session; returns how many changed
    pub fn tick_durations(&self, now: u64) -> usize {
        let changed: Vec<AgentId> = {
            let mut sessions = self.write();
            sessions
                .iter_mut()
                .filter(|s| s.is_active())
                .filter_map(|s| {
                    let elapsed = s.elapsed_at(now);
                    (elapsed != s.duration).then(|| {
                        s.duration = elapsed;
                        s.id.clone()
                    })
                })
                .collect()
        };
        let count = changed.len();
        for id in changed {
            self.publish(RegistryChange::Updated(id));
        }
        count
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the registry holds no sessions
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of sessions in `running` or `warning`
    pub fn running_count(&self) -> usize {
        self.read().iter().filter(|s| s.is_active()).count()
    }

    /// Status of one session
    pub fn status(&self, id: &AgentId) -> Option<SessionStatus> {
        self.read().iter().find(|s| &s.id == id).map(|s| s.status)
    }

    /// Sum of `total_cost` over all sessions
    pub fn total_cost(&self) -> f64 {
        self.read().iter().map(|s| s.total_cost).sum()
    }

    /// Sum of `total_tokens` over all sessions
    pub fn total_tokens(&self) -> u64 {
        self.read()
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.total_tokens))
    }
}
