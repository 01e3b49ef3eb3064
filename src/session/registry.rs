//! Session registry
//!
//! Tracks every live connection and which of them are dashboards.
//! Readers get a copy of the membership taken under the lock; all sends
//! happen after the lock is released.

use std::collections::HashSet;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::SessionHandle;

#[derive(Default)]
struct Membership {
    /// Sessions in connect order
    sessions: Vec<SessionHandle>,
    /// Ids of sessions that asked for the server address
    dashboards: HashSet<Uuid>,
}

/// Concurrency-safe set of connected sessions
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Membership>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns false if it was already present.
    pub async fn add(&self, session: SessionHandle) -> bool {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains(&session) {
            return false;
        }
        debug!("Registered session {}", session);
        inner.sessions.push(session);
        true
    }

    /// Remove a session and its dashboard mark. Returns false if it was absent.
    pub async fn remove(&self, session: &SessionHandle) -> bool {
        let mut inner = self.inner.write().await;
        inner.dashboards.remove(&session.id());
        let before = inner.sessions.len();
        inner.sessions.retain(|s| s != session);
        let removed = inner.sessions.len() != before;
        if removed {
            debug!("Removed session {}", session);
        }
        removed
    }

    /// Copy of the current membership
    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        self.inner.read().await.sessions.clone()
    }

    /// Number of connected sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Mark a registered session as a dashboard. Returns false if the session is unknown.
    pub async fn mark_dashboard(&self, session: &SessionHandle) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains(session) {
            return false;
        }
        inner.dashboards.insert(session.id());
        true
    }

    /// Copy of the sessions currently marked as dashboards
    pub async fn dashboards(&self) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .filter(|s| inner.dashboards.contains(&s.id()))
            .cloned()
            .collect()
    }

    /// Send a text frame to every session except `excluding`.
    ///
    /// A failed send is logged and skipped. Returns the number of sessions
    /// the frame was queued for.
    pub async fn broadcast(&self, payload: &str, excluding: Option<&SessionHandle>) -> usize {
        let recipients = self.snapshot().await;
        send_to_all(&recipients, payload, excluding)
    }
}

/// Queue `payload` for each recipient except `excluding`, isolating failures
pub fn send_to_all(
    recipients: &[SessionHandle],
    payload: &str,
    excluding: Option<&SessionHandle>,
) -> usize {
    let mut delivered = 0;
    for session in recipients {
        if excluding == Some(session) {
            continue;
        }
        match session.send_text(payload) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to send to session {}: {}", session, e),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_add_remove_snapshot() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = SessionHandle::new(None);
        let (b, _rx_b) = SessionHandle::new(None);

        assert!(registry.add(a.clone()).await);
        assert!(registry.add(b.clone()).await);
        assert_eq!(registry.snapshot().await, vec![a.clone(), b.clone()]);

        assert!(registry.remove(&a).await);
        assert_eq!(registry.snapshot().await, vec![b.clone()]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_add_ignored() {
        let registry = SessionRegistry::new();
        let (a, _rx) = SessionHandle::new(None);
        assert!(registry.add(a.clone()).await);
        assert!(!registry.add(a.clone()).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = SessionRegistry::new();
        let (a, _rx) = SessionHandle::new(None);
        assert!(!registry.remove(&a).await);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = SessionHandle::new(None);
        registry.add(a.clone()).await;

        let snapshot = registry.snapshot().await;
        registry.remove(&a).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_size_tracks_connects_and_disconnects() {
        let registry = SessionRegistry::new();
        let mut open = Vec::new();
        for round in 0..20 {
            let (s, rx) = SessionHandle::new(None);
            registry.add(s.clone()).await;
            open.push((s, rx));
            if round % 3 == 0 {
                let (s, _rx) = open.remove(0);
                registry.remove(&s).await;
            }
            assert_eq!(registry.len().await, open.len());
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = SessionHandle::new(None);
        let (b, mut rx_b) = SessionHandle::new(None);
        registry.add(a.clone()).await;
        registry.add(b.clone()).await;

        let delivered = registry.broadcast("hi", Some(&a)).await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Message::Text("hi".to_string()));
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failed_recipient() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = SessionHandle::new(None);
        let (dead, rx_dead) = SessionHandle::new(None);
        let (c, mut rx_c) = SessionHandle::new(None);
        registry.add(a).await;
        registry.add(dead).await;
        registry.add(c).await;
        drop(rx_dead);

        let delivered = registry.broadcast("payload", None).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap(), Message::Text("payload".to_string()));
        assert_eq!(rx_c.try_recv().unwrap(), Message::Text("payload".to_string()));
    }

    #[tokio::test]
    async fn test_dashboards() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = SessionHandle::new(None);
        let (b, _rx_b) = SessionHandle::new(None);
        let (stranger, _rx_s) = SessionHandle::new(None);
        registry.add(a.clone()).await;
        registry.add(b.clone()).await;

        assert!(registry.mark_dashboard(&b).await);
        assert!(!registry.mark_dashboard(&stranger).await);
        assert_eq!(registry.dashboards().await, vec![b.clone()]);

        registry.remove(&b).await;
        assert!(registry.dashboards().await.is_empty());
    }
}
