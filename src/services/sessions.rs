use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::models::Session;

pub const SESSION_TIMEOUT_MINUTES: i64 = 30;
pub const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);

type Slot = Arc<AsyncMutex<Option<Session>>>;

/// Exclusive access to one identity's session for the duration of an event.
///
/// Holding the guard serializes every event for that identity; dropping it
/// releases the identity to the next event.
pub struct SessionGuard {
    guard: OwnedMutexGuard<Option<Session>>,
    ttl: Duration,
}

impl SessionGuard {
    /// Current live session, if any. Expired sessions read as absent.
    pub fn get(&self) -> Option<&Session> {
        let now = Utc::now().naive_utc();
        (*self.guard)
            .as_ref()
            .filter(|s| !s.is_expired(now, self.ttl))
    }

    /// Live session, creating a fresh one if absent or expired.
    #[cfg(test)]
    pub fn get_or_create(&mut self, phone: &str) -> &mut Session {
        let now = Utc::now().naive_utc();
        let expired = (*self.guard)
            .as_ref()
            .map(|s| s.is_expired(now, self.ttl))
            .unwrap_or(true);
        if expired {
            *self.guard = Some(Session::new(phone));
        }
        self.guard.get_or_insert_with(|| Session::new(phone))
    }

    /// Stores `session` as the identity's state, stamping activity now.
    pub fn save(&mut self, mut session: Session) {
        session.touch();
        *self.guard = Some(session);
    }

    /// Session destroyed (explicit cancellation or conversation end).
    pub fn clear(&mut self) {
        *self.guard = None;
    }
}

/// Process-wide conversational state, one slot per actor identity.
pub struct SessionStore {
    slots: Mutex<HashMap<String, Slot>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::minutes(SESSION_TIMEOUT_MINUTES))
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Waits until no other event for `phone` is in flight and returns the
    /// guard for its session slot.
    pub async fn acquire(&self, phone: &str) -> SessionGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(phone.to_string()).or_default())
        };
        SessionGuard {
            guard: slot.lock_owned().await,
            ttl: self.ttl,
        }
    }

    /// Snapshot of a live session without taking the identity gate. Returns
    /// `None` if the session is absent, expired, or currently being mutated.
    pub fn peek(&self, phone: &str) -> Option<Session> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get(phone)?;
        let session = slot.try_lock().ok()?;
        let now = Utc::now().naive_utc();
        (*session)
            .as_ref()
            .filter(|s| !s.is_expired(now, self.ttl))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes empty and expired slots. A slot is only removed when nobody
    /// else holds a handle to it, so in-flight events keep their session.
    pub fn sweep(&self) -> usize {
        let now = Utc::now().naive_utc();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();

        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(session) => (*session)
                    .as_ref()
                    .map(|s| !s.is_expired(now, self.ttl))
                    .unwrap_or(false),
                Err(_) => true,
            }
        });

        before - slots.len()
    }

    /// Background eviction task. Abort the handle on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: StdDuration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep();
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "expired sessions swept");
                }
            }
        })
    }
}
