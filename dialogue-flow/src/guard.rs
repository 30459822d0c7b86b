use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes turns per session: at most one turn for a given session id is
/// processed at a time, while distinct sessions proceed fully in parallel.
pub struct SessionGuard {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for a session, blocking until any in-flight turn for
    /// the same session finishes. The returned guard must be held for the
    /// whole inbound-message-to-outbound-response cycle.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a session (used on reset). Callers must hold
    /// the session's guard when invoking this.
    pub fn forget(&self, session_id: &str) {
        self.locks.remove(session_id);
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}
