use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::activity::Activity;
use super::SessionId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("capacity exhausted and no session is eligible for eviction")]
    Exhausted,
    #[error("session capacity is zero")]
    NoCapacity,
    #[error("server is shutting down")]
    ShuttingDown,
}

/// How long an admission waits for some running session to become
/// evictable before giving up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
            attempts: 1500,
        }
    }
}

struct Entry {
    activity: Arc<Activity>,
    kick: mpsc::Sender<()>,
}

impl Entry {
    /// A full slot means a kick is already pending.
    fn kick(&self) {
        let _ = self.kick.try_send(());
    }
}

/// Table of live sessions with capacity-bounded admission.
///
/// Membership changes happen under one lock. Activity stamps are atomics
/// owned by the sessions and only read here while scanning for a victim.
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    capacity: usize,
    retry: RetryPolicy,
}

/// A granted slot. Dropping it releases the slot.
pub struct Admission {
    registry: Arc<Registry>,
    id: SessionId,
    kick: mpsc::Receiver<()>,
}

impl Admission {
    #[cfg(test)]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Receives at most one pending kick.
    pub fn kick(&mut self) -> &mut mpsc::Receiver<()> {
        &mut self.kick
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}

impl Registry {
    /// `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity: capacity.unwrap_or(usize::MAX),
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn capacity(&self) -> Option<usize> {
        (self.capacity != usize::MAX).then_some(self.capacity)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Admit a session, evicting the longest inactive one if the table is
    /// full. Sessions that have not seen any traffic yet are never evicted;
    /// if all of them are in that state the admission waits and retries.
    pub async fn admit(
        self: &Arc<Self>,
        id: SessionId,
        activity: Arc<Activity>,
    ) -> Result<Admission, AdmissionError> {
        if self.capacity == 0 {
            return Err(AdmissionError::NoCapacity);
        }

        let (kick_tx, kick_rx) = mpsc::channel(1);
        let mut attempts = 0;

        loop {
            if self.try_insert(id, &activity, &kick_tx) {
                return Ok(Admission {
                    registry: Arc::clone(self),
                    id,
                    kick: kick_rx,
                });
            }

            if attempts >= self.retry.attempts {
                tracing::warn!(session = %id, attempts, "No session could be evicted, rejecting");
                return Err(AdmissionError::Exhausted);
            }
            if attempts == 0 {
                tracing::debug!(session = %id, "All sessions are still starting, waiting for a slot");
            }
            attempts += 1;
            tokio::time::sleep(self.retry.interval).await;
        }
    }

    fn try_insert(&self, id: SessionId, activity: &Arc<Activity>, kick: &mpsc::Sender<()>) -> bool {
        let mut sessions = self.sessions.lock();

        if sessions.len() >= self.capacity {
            let Some(victim) = Self::longest_inactive(&sessions) else {
                return false;
            };
            if let Some(evicted) = sessions.remove(&victim) {
                evicted.kick();
                tracing::info!(
                    session = %victim,
                    last_activity = evicted.activity.last(),
                    admitted = %id,
                    "Evicting longest inactive session"
                );
            }
        }

        sessions.insert(
            id,
            Entry {
                activity: Arc::clone(activity),
                kick: kick.clone(),
            },
        );
        true
    }

    /// Smallest nonzero stamp wins; ties go to the smaller id.
    fn longest_inactive(sessions: &HashMap<SessionId, Entry>) -> Option<SessionId> {
        sessions
            .iter()
            .map(|(id, entry)| (entry.activity.last(), *id))
            .filter(|(last, _)| *last != 0)
            .min()
            .map(|(_, id)| id)
    }

    /// Ask a session to end itself. Returns false if it is not registered.
    #[cfg(test)]
    pub fn kick(&self, id: &SessionId) -> bool {
        match self.sessions.lock().get(id) {
            Some(entry) => {
                entry.kick();
                true
            }
            None => false,
        }
    }

    /// Remove a session. Removing an absent session is a no-op.
    pub fn release(&self, id: &SessionId) -> bool {
        self.sessions.lock().remove(id).is_some()
    }
}
