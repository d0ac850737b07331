//! The directory of authenticated sessions.

use std::collections::HashMap;

use tokio::sync::RwLock;
use yep_protocol::{Level, UserId};
use yep_transport::ConnectionId;

use crate::{Frame, Outbox};

/// What the registry holds for one connected user.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub user_id: UserId,
    /// Contact identity shown in online lists.
    pub identity: String,
    pub level: Level,
    /// The connection that owns this entry. Removal is keyed on it so a
    /// replaced connection can't remove its successor.
    pub conn_id: ConnectionId,
    pub outbox: Outbox,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// User identifier → current session.
///
/// # Locking
///
/// Insert and remove take the write lock. Broadcast holds the read lock for
/// the whole fan-out, which is only a loop of non-blocking enqueues. No
/// lock is ever held across network I/O.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: RwLock<HashMap<UserId, SessionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, returning the one it replaced, if any.
    ///
    /// At most one entry exists per identifier. The caller decides what
    /// happens to the replaced connection.
    pub async fn insert(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let user_id = handle.user_id.clone();
        let conn_id = handle.conn_id;
        let previous = self.sessions.write().await.insert(user_id.clone(), handle);
        match &previous {
            Some(old) => tracing::info!(
                %user_id,
                %conn_id,
                replaced = %old.conn_id,
                "session replaced"
            ),
            None => tracing::debug!(%user_id, %conn_id, "session registered"),
        }
        previous
    }

    /// Removes the entry for `user_id` only if it still belongs to
    /// `conn_id`. Returns the removed handle.
    pub async fn remove(&self, user_id: &UserId, conn_id: ConnectionId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let owned = sessions
            .get(user_id)
            .is_some_and(|current| current.conn_id == conn_id);
        if !owned {
            return None;
        }
        tracing::debug!(%user_id, %conn_id, "session removed");
        sessions.remove(user_id)
    }

    /// Enqueues `frame` for every session except `exclude`.
    ///
    /// A full or closed outbox counts as dropped and is logged; the
    /// remaining recipients still get the frame. Failed sessions are left
    /// for their own read loop to clean up.
    pub async fn broadcast(&self, frame: Frame, exclude: Option<&UserId>) -> BroadcastReport {
        let sessions = self.sessions.read().await;
        let mut report = BroadcastReport::default();
        for (user_id, handle) in sessions.iter() {
            if exclude == Some(user_id) {
                continue;
            }
            match handle.outbox.try_deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.dropped += 1;
                    tracing::warn!(%user_id, conn_id = %handle.conn_id, error = %e, "broadcast delivery dropped");
                }
            }
        }
        report
    }

    /// Contact identities of everyone connected, sorted.
    pub async fn online(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .map(|handle| handle.identity.clone())
            .collect();
        identities.sort();
        identities
    }

    /// Returns `true` if `user_id` has a registered session.
    pub async fn contains(&self, user_id: &UserId) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    /// The handle currently registered for `user_id`.
    pub async fn get(&self, user_id: &UserId) -> Option<SessionHandle> {
        self.sessions.read().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use yep_transport::Connection;

    use super::*;
    use crate::testing::MockConnection;
    use crate::{DEFAULT_WRITE_TIMEOUT, spawn_writer};

    struct Session {
        handle: SessionHandle,
        conn: Arc<MockConnection>,
    }

    fn session(user: &str, conn_id: u64) -> Session {
        session_on(user, Arc::new(MockConnection::new(conn_id)), 8)
    }

    fn session_on(user: &str, conn: Arc<MockConnection>, capacity: usize) -> Session {
        let (outbox, _writer) = spawn_writer(Arc::clone(&conn), capacity, DEFAULT_WRITE_TIMEOUT);
        Session {
            handle: SessionHandle {
                user_id: UserId::from(user),
                identity: format!("{user}@x.com"),
                level: Level::C,
                conn_id: conn.id(),
                outbox,
            },
            conn,
        }
    }

    fn frame(text: &str) -> Frame {
        Arc::from(text.as_bytes())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_insert_same_user_replaces_entry() {
        let registry = Registry::new();
        let first = session("yep_1", 1);
        let second = session("yep_1", 2);

        assert!(registry.insert(first.handle).await.is_none());
        let replaced = registry.insert(second.handle).await.expect("first entry replaced");

        assert_eq!(replaced.conn_id, ConnectionId::new(1));
        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.get(&UserId::from("yep_1")).await.unwrap().conn_id,
            ConnectionId::new(2)
        );
    }

    #[tokio::test]
    async fn test_remove_with_stale_connection_is_noop() {
        let registry = Registry::new();
        registry.insert(session("yep_1", 1).handle).await;
        registry.insert(session("yep_1", 2).handle).await;

        let id = UserId::from("yep_1");
        assert!(registry.remove(&id, ConnectionId::new(1)).await.is_none());
        assert!(registry.contains(&id).await);

        assert!(registry.remove(&id, ConnectionId::new(2)).await.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_user() {
        let registry = Registry::new();
        let a = session("yep_a", 1);
        let b = session("yep_b", 2);
        let c = session("yep_c", 3);
        for s in [&a, &b, &c] {
            registry.insert(s.handle.clone()).await;
        }

        let report = registry
            .broadcast(frame("hello"), Some(&UserId::from("yep_a")))
            .await;
        settle().await;

        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert!(a.conn.sent().is_empty());
        assert_eq!(b.conn.sent(), vec!["hello"]);
        assert_eq!(c.conn.sent(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_broadcast_without_exclusion_reaches_everyone() {
        let registry = Registry::new();
        let a = session("yep_a", 1);
        let b = session("yep_b", 2);
        registry.insert(a.handle.clone()).await;
        registry.insert(b.handle.clone()).await;

        let report = registry.broadcast(frame("all"), None).await;
        settle().await;

        assert_eq!(report.delivered, 2);
        assert_eq!(a.conn.sent(), vec!["all"]);
        assert_eq!(b.conn.sent(), vec!["all"]);
    }

    #[tokio::test]
    async fn test_broadcast_slow_session_does_not_block_others() {
        let registry = Registry::new();
        let slow = session_on("yep_slow", Arc::new(MockConnection::stalled(1)), 1);
        let fast = session("yep_fast", 2);
        registry.insert(slow.handle.clone()).await;
        registry.insert(fast.handle.clone()).await;

        // First frame is taken by the stalled writer, second fills the queue.
        registry.broadcast(frame("1"), None).await;
        settle().await;
        registry.broadcast(frame("2"), None).await;

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            registry.broadcast(frame("3"), None),
        )
        .await
        .expect("broadcast must not block on a slow session");
        settle().await;

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(fast.conn.sent(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_broadcast_closed_outbox_counts_as_dropped() {
        let registry = Registry::new();
        let gone = session("yep_gone", 1);
        let here = session("yep_here", 2);
        gone.handle.outbox.close();
        registry.insert(gone.handle.clone()).await;
        registry.insert(here.handle.clone()).await;

        let report = registry.broadcast(frame("x"), None).await;
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
    }

    #[tokio::test]
    async fn test_online_lists_sorted_identities() {
        let registry = Registry::new();
        registry.insert(session("yep_b", 1).handle).await;
        registry.insert(session("yep_a", 2).handle).await;

        assert_eq!(registry.online().await, vec!["yep_a@x.com", "yep_b@x.com"]);
    }
}
