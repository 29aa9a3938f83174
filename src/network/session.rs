//! Session Registry
//!
//! Process-wide directory of live sessions: session-id to session and
//! user-id to session-id, with duplicate-login eviction. A Session is the
//! in-memory face of one authenticated socket; the registry is its
//! exclusive owner and all mutation goes through it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use crate::core::ids::{LobbyId, MatchId, SessionId, UserId};
use crate::network::protocol::{ServerMessage, UserStatus};

/// One authenticated socket.
///
/// `outbound` is the handle to the socket's single writer task; cloning a
/// Session clones the handle, so snapshots taken out of the registry can
/// still message the client.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier.
    pub session_id: SessionId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Display name on record at auth time.
    pub display_name: String,
    /// Single-writer channel to the socket.
    pub outbound: mpsc::Sender<ServerMessage>,
    /// Presence status.
    pub status: UserStatus,
    /// Live match this session is part of, if any.
    pub current_match: Option<MatchId>,
    /// Lobby this session sits in, if any.
    pub current_lobby: Option<LobbyId>,
    /// Last keepalive receipt.
    pub last_ping_at: Instant,
    /// When the session was registered.
    pub connected_at: Instant,
}

impl Session {
    /// Create a session in `Online` with fresh timestamps.
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        display_name: String,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            user_id,
            display_name,
            outbound,
            status: UserStatus::Online,
            current_match: None,
            current_lobby: None,
            last_ping_at: now,
            connected_at: now,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<SessionId, Session>,
    by_user: BTreeMap<UserId, SessionId>,
}

/// The process-wide session directory.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session. If the user already has a live session, that
    /// session is removed from both maps and returned so the caller can
    /// deliver the `duplicate_session` disconnect before the new session
    /// is acknowledged.
    pub async fn register(&self, session: Session) -> Option<Session> {
        let mut inner = self.inner.write().await;

        let evicted = inner
            .by_user
            .get(&session.user_id)
            .copied()
            .and_then(|old_id| inner.sessions.remove(&old_id));

        inner.by_user.insert(session.user_id, session.session_id);
        inner.sessions.insert(session.session_id, session);

        evicted
    }

    /// Remove a session. Returns the removed session, or `None` when the
    /// id is no longer registered (e.g. it was evicted by a duplicate
    /// login) - callers use that to skip the disconnect cleanup path.
    pub async fn deregister(&self, session_id: SessionId) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(&session_id)?;
        // only drop the user mapping if it still points at this session
        if inner.by_user.get(&session.user_id) == Some(&session_id) {
            inner.by_user.remove(&session.user_id);
        }
        Some(session)
    }

    /// Snapshot a session by id.
    pub async fn lookup_by_session(&self, session_id: SessionId) -> Option<Session> {
        self.inner.read().await.sessions.get(&session_id).cloned()
    }

    /// Snapshot the live session of a user.
    pub async fn lookup_by_user(&self, user_id: UserId) -> Option<Session> {
        let inner = self.inner.read().await;
        let session_id = inner.by_user.get(&user_id)?;
        inner.sessions.get(session_id).cloned()
    }

    /// Refresh a session's keepalive timestamp.
    pub async fn touch_ping(&self, session_id: SessionId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&session_id) {
            Some(session) => {
                session.last_ping_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Set the presence status of a user's live session.
    pub async fn update_status(&self, user_id: UserId, status: UserStatus) -> bool {
        self.update_by_user(user_id, |s| s.status = status).await
    }

    /// Point a user's session at a match (or clear it).
    pub async fn set_current_match(&self, user_id: UserId, match_id: Option<MatchId>) -> bool {
        self.update_by_user(user_id, |s| s.current_match = match_id)
            .await
    }

    /// Point a user's session at a lobby (or clear it).
    pub async fn set_current_lobby(&self, user_id: UserId, lobby_id: Option<LobbyId>) -> bool {
        self.update_by_user(user_id, |s| s.current_lobby = lobby_id)
            .await
    }

    async fn update_by_user(&self, user_id: UserId, apply: impl FnOnce(&mut Session)) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session_id) = inner.by_user.get(&user_id).copied() else {
            return false;
        };
        match inner.sessions.get_mut(&session_id) {
            Some(session) => {
                apply(session);
                true
            }
            None => false,
        }
    }

    /// Sessions whose last ping is older than `timeout`, for the idle
    /// sweeper.
    pub async fn idle_sessions(&self, timeout: Duration) -> Vec<Session> {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .sessions
            .values()
            .filter(|s| now.duration_since(s.last_ping_at) > timeout)
            .cloned()
            .collect()
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(user: UserId) -> (Session, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Session::new(SessionId::generate(), user, "tester".into(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let user = UserId::generate();
        let (session, _rx) = session_for(user);
        let session_id = session.session_id;

        assert!(registry.register(session).await.is_none());
        assert!(registry.lookup_by_session(session_id).await.is_some());
        assert_eq!(
            registry.lookup_by_user(user).await.unwrap().session_id,
            session_id
        );
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_login_evicts_old() {
        let registry = SessionRegistry::new();
        let user = UserId::generate();

        let (first, _rx1) = session_for(user);
        let first_id = first.session_id;
        registry.register(first).await;

        let (second, _rx2) = session_for(user);
        let second_id = second.session_id;
        let evicted = registry.register(second).await.unwrap();

        assert_eq!(evicted.session_id, first_id);
        // exactly one live session for the user
        assert_eq!(registry.count().await, 1);
        assert_eq!(
            registry.lookup_by_user(user).await.unwrap().session_id,
            second_id
        );
        assert!(registry.lookup_by_session(first_id).await.is_none());
    }

    #[tokio::test]
    async fn test_deregister_of_evicted_session_is_noop() {
        let registry = SessionRegistry::new();
        let user = UserId::generate();

        let (first, _rx1) = session_for(user);
        let first_id = first.session_id;
        registry.register(first).await;

        let (second, _rx2) = session_for(user);
        registry.register(second).await;

        // the evicted socket's reader eventually runs its close path;
        // deregister must not disturb the new session's mapping
        assert!(registry.deregister(first_id).await.is_none());
        assert!(registry.lookup_by_user(user).await.is_some());
    }

    #[tokio::test]
    async fn test_deregister_clears_user_mapping() {
        let registry = SessionRegistry::new();
        let user = UserId::generate();
        let (session, _rx) = session_for(user);
        let session_id = session.session_id;
        registry.register(session).await;

        let removed = registry.deregister(session_id).await.unwrap();
        assert_eq!(removed.user_id, user);
        assert!(registry.lookup_by_user(user).await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_status_and_refs_updates() {
        let registry = SessionRegistry::new();
        let user = UserId::generate();
        let (session, _rx) = session_for(user);
        registry.register(session).await;

        assert!(registry.update_status(user, UserStatus::InGame).await);
        let match_id = MatchId::generate();
        assert!(registry.set_current_match(user, Some(match_id)).await);

        let snapshot = registry.lookup_by_user(user).await.unwrap();
        assert_eq!(snapshot.status, UserStatus::InGame);
        assert_eq!(snapshot.current_match, Some(match_id));

        assert!(registry.set_current_match(user, None).await);
        let snapshot = registry.lookup_by_user(user).await.unwrap();
        assert!(snapshot.current_match.is_none());

        assert!(!registry.update_status(UserId::generate(), UserStatus::Away).await);
    }

    #[tokio::test]
    async fn test_idle_session_detection() {
        let registry = SessionRegistry::new();
        let user = UserId::generate();
        let (session, _rx) = session_for(user);
        let session_id = session.session_id;
        registry.register(session).await;

        assert!(registry.idle_sessions(Duration::from_secs(60)).await.is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let idle = registry.idle_sessions(Duration::from_millis(10)).await;
        assert_eq!(idle.len(), 1);

        // a ping refresh rescues the session
        assert!(registry.touch_ping(session_id).await);
        assert!(registry
            .idle_sessions(Duration::from_millis(10))
            .await
            .is_empty());
    }
}
