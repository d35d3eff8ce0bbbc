//! Per-session mutual exclusion for integrating layers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Registry of one async mutex per session id.
///
/// Hold the guard from loading a session until it has been stored again;
/// concurrent requests against the same id then serialize instead of
/// overwriting each other's updates. An id's entry lives only while some
/// caller holds or waits for it.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let mutex = {
            let mut locks = lock_map(&self.locks);
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        // Built before awaiting so a cancelled waiter still releases its entry.
        let mut guard = SessionGuard {
            locks: Arc::clone(&self.locks),
            session_id: session_id.to_string(),
            mutex,
            held: None,
        };
        guard.held = Some(Arc::clone(&guard.mutex).lock_owned().await);
        guard
    }

    /// Number of session ids currently held or awaited.
    pub fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive access to one session id, released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    locks: Arc<Mutex<LockMap>>,
    session_id: String,
    mutex: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.held.take();
        let mut locks = lock_map(&self.locks);
        // The map and this guard are the only references left.
        let idle = locks
            .get(&self.session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.mutex) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(&self.session_id);
        }
    }
}
