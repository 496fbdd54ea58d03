//! Open connections by user, so logout and shutdown can close them.

use dashmap::DashMap;
use nudgeroom_core::{CloseHandle, CloseReason};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    user: String,
    close: CloseHandle,
}

#[derive(Debug, Default)]
struct Inner {
    connections: DashMap<u64, Entry>,
    next_id: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection until the returned guard is dropped.
    pub fn register(&self, user: &str, close: CloseHandle) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.connections.insert(
            id,
            Entry {
                user: user.to_string(),
                close,
            },
        );
        debug!(user, id, count = self.count(), "connection registered");
        Registration {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Close every connection of `user`. Returns how many were newly closed.
    pub fn close_user(&self, user: &str, reason: CloseReason) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|entry| entry.user == user)
            .filter(|entry| entry.close.close(reason))
            .count()
    }

    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|entry| entry.close.close(reason))
            .count()
    }

    pub fn count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn count_for(&self, user: &str) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|entry| entry.user == user)
            .count()
    }
}

/// Removes its connection from the registry on drop.
#[derive(Debug)]
pub struct Registration {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.connections.remove(&self.id);
    }
}
