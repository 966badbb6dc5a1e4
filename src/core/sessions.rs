//! In-memory session registry
//!
//! Every browser tab owns its own chat and quiz controller, addressed by a
//! random id. Sessions live until they are closed, swept after sitting idle,
//! or the process exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct Entry<T> {
    handle: Arc<Mutex<T>>,
    last_touched: Instant,
}

/// Map from session id to a controller guarded by its own lock
#[derive(Debug)]
pub struct SessionRegistry<T> {
    inner: RwLock<HashMap<Uuid, Entry<T>>>,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller and return its new id
    pub async fn create(&self, controller: T) -> (Uuid, Arc<Mutex<T>>) {
        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(controller));
        self.inner.write().await.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_touched: Instant::now(),
            },
        );
        tracing::debug!(session = %id, "Session created");
        (id, handle)
    }

    /// Look up a session, marking it as recently used
    pub async fn get(&self, id: &Uuid) -> Option<Arc<Mutex<T>>> {
        let mut sessions = self.inner.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_touched = Instant::now();
        Some(entry.handle.clone())
    }

    /// Returns false when no such session exists
    pub async fn remove(&self, id: &Uuid) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Drop every session untouched for at least `idle`.
    ///
    /// Work already running on a swept session (a spawned chat turn or quiz
    /// generation) keeps its own handle and finishes normally.
    pub async fn sweep(&self, idle: Duration) -> usize {
        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_touched.elapsed() < idle);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
