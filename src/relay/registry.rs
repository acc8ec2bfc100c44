//! # Session Registry
//!
//! Maps a gateway connection id to the one live backend session serving it.
//!
//! ## Locking discipline:
//! The map lock is held only for the map mutation itself. Cancelling a
//! session's token is synchronous and happens inside the critical section;
//! closing its socket is network I/O and always happens after the lock is
//! released, so a slow backend never blocks lookups for other connections.

use crate::backend::FrameSink;
use crate::protocol::BackendEvent;
use chrono::{DateTime, Utc};
use futures_util::SinkExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound for flushing and closing a backend socket during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive owner of one backend connection's write half.
///
/// Writers are serialized through an async mutex, so request handlers for the
/// same connection id can send concurrently without interleaving frames.
/// The read half lives in the session's outbound listener, which stops when
/// `cancel` fires.
pub struct SessionHandle {
    connection_id: String,
    session_id: Uuid,
    generation: u64,
    opened_at: DateTime<Utc>,
    writer: Mutex<FrameSink>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(connection_id: String, generation: u64, sink: FrameSink) -> Self {
        Self {
            connection_id,
            session_id: Uuid::new_v4(),
            generation,
            opened_at: Utc::now(),
            writer: Mutex::new(sink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            connection_id: self.connection_id.clone(),
            session_id: self.session_id,
            generation: self.generation,
            opened_at: self.opened_at,
        }
    }

    /// Token the outbound listener races its reads against.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn send(&self, event: &BackendEvent) -> anyhow::Result<()> {
        let text = serde_json::to_string(event)?;
        self.send_text(text).await
    }

    pub async fn send_text(&self, text: String) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(anyhow::anyhow!("session {} is closed", self.session_id));
        }
        let mut writer = self.writer.lock().await;
        writer.send(text).await
    }

    /// Stop the listener and close the backend socket. Safe to call more than once.
    pub async fn close(&self) {
        self.cancel.cancel();

        let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
            let mut writer = self.writer.lock().await;
            writer.close().await
        })
        .await;

        match closed {
            Ok(Ok(())) => debug!(
                connection_id = %self.connection_id,
                session_id = %self.session_id,
                "Backend connection closed"
            ),
            Ok(Err(e)) => debug!(
                connection_id = %self.connection_id,
                session_id = %self.session_id,
                error = %e,
                "Backend connection was already broken while closing"
            ),
            Err(_) => warn!(
                connection_id = %self.connection_id,
                session_id = %self.session_id,
                "Backend connection did not close within {:?}",
                CLOSE_TIMEOUT
            ),
        }
    }
}

/// What `/api/v1/metrics` shows about a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub connection_id: String,
    pub session_id: Uuid,
    pub generation: u64,
    pub opened_at: DateTime<Utc>,
}

/// Concurrency-safe connection id → session map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation numbers distinguish successive sessions for the same connection id.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Install `handle`, tearing down whatever session held its connection id.
    ///
    /// Returns `true` when an older session was replaced.
    pub async fn register(&self, handle: Arc<SessionHandle>) -> bool {
        let previous = {
            let mut sessions = self.write();
            let previous = sessions.insert(handle.connection_id().to_string(), handle);
            if let Some(old) = &previous {
                old.cancel.cancel();
            }
            previous
        };

        match previous {
            Some(old) => {
                old.close().await;
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, connection_id: &str) -> Option<Arc<SessionHandle>> {
        self.read().get(connection_id).cloned()
    }

    /// Remove and close the session for `connection_id`. Removing an absent id is a no-op.
    pub async fn remove(&self, connection_id: &str) -> bool {
        let removed = {
            let mut sessions = self.write();
            let removed = sessions.remove(connection_id);
            if let Some(handle) = &removed {
                handle.cancel.cancel();
            }
            removed
        };

        match removed {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Like [`remove`](Self::remove), but only if the entry still belongs to `generation`.
    ///
    /// Used by listeners cleaning up after their own socket died: a session that
    /// has since been replaced must not take its successor down with it.
    pub async fn remove_if_current(&self, connection_id: &str, generation: u64) -> bool {
        let removed = {
            let mut sessions = self.write();
            let is_current = sessions
                .get(connection_id)
                .is_some_and(|handle| handle.generation() == generation);
            if !is_current {
                return false;
            }
            let removed = sessions.remove(connection_id);
            if let Some(handle) = &removed {
                handle.cancel.cancel();
            }
            removed
        };

        if let Some(handle) = removed {
            handle.close().await;
        }
        true
    }

    /// Remove and close every session (process shutdown).
    pub async fn drain(&self) -> usize {
        let drained: Vec<Arc<SessionHandle>> = {
            let mut sessions = self.write();
            sessions.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &drained {
            handle.cancel.cancel();
        }
        for handle in &drained {
            handle.close().await;
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self.read().values().map(|handle| handle.summary()).collect();
        summaries.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        summaries
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_link;

    fn handle(registry: &SessionRegistry, id: &str) -> (Arc<SessionHandle>, crate::testing::FakeBackend) {
        let (link, backend) = fake_link();
        let handle = Arc::new(SessionHandle::new(id.to_string(), registry.next_generation(), link.sink));
        (handle, backend)
    }

    #[tokio::test]
    async fn test_register_replaces_and_closes_previous() {
        let registry = SessionRegistry::new();
        let (first, mut first_backend) = handle(&registry, "abc");
        let (second, mut second_backend) = handle(&registry, "abc");

        assert!(!registry.register(first.clone()).await);
        assert!(registry.register(second.clone()).await);

        // Exactly one live handle per id
        assert_eq!(registry.len(), 1);
        assert!(first.is_closed());
        assert!(first_backend.wait_closed().await);
        assert!(!second.is_closed());
        assert!(!second_backend.is_closed_now());
        assert_eq!(registry.lookup("abc").unwrap().generation(), second.generation());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        assert!(!registry.remove("missing").await);

        let (first, mut backend) = handle(&registry, "abc");
        registry.register(first.clone()).await;
        assert!(registry.remove("abc").await);
        assert!(!registry.remove("abc").await);
        assert!(registry.lookup("abc").is_none());
        assert!(backend.wait_closed().await);
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_remove_successor() {
        let registry = SessionRegistry::new();
        let (first, _first_backend) = handle(&registry, "abc");
        let (second, _second_backend) = handle(&registry, "abc");
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        assert!(!registry.remove_if_current("abc", first.generation()).await);
        assert!(registry.lookup("abc").is_some());

        assert!(registry.remove_if_current("abc", second.generation()).await);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_writes() {
        let registry = SessionRegistry::new();
        let (first, _backend) = handle(&registry, "abc");
        first.close().await;
        assert!(first.send_text("{}".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_closes_everything() {
        let registry = SessionRegistry::new();
        let (a, mut backend_a) = handle(&registry, "a");
        let (b, mut backend_b) = handle(&registry, "b");
        registry.register(a).await;
        registry.register(b).await;

        assert_eq!(registry.drain().await, 2);
        assert_eq!(registry.len(), 0);
        assert!(backend_a.wait_closed().await);
        assert!(backend_b.wait_closed().await);
    }
}
