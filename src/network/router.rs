//! Message Fan-Out
//!
//! Outbound delivery primitives built on the session registry. Every send
//! is best-effort: a full or closed writer channel logs and never aborts
//! the caller. Per-client ordering comes from the single writer task each
//! socket owns, so concurrent sends here are safe.

use std::sync::Arc;

use tracing::debug;

use crate::core::ids::{SessionId, UserId};
use crate::network::protocol::{ServerMessage, UserStatus};
use crate::network::session::SessionRegistry;
use crate::store::Store;

/// Fan-out routes over live sessions.
pub struct Router {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn Store>,
}

impl Router {
    /// Build a router over the registry and store.
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    /// Send to one session. Returns whether the message was queued.
    pub async fn send_to_session(&self, session_id: SessionId, message: ServerMessage) -> bool {
        match self.registry.lookup_by_session(session_id).await {
            Some(session) => {
                if session.outbound.send(message).await.is_err() {
                    debug!(%session_id, "dropping message for closed session");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Send to whatever session the user currently holds.
    pub async fn send_to_user(&self, user_id: UserId, message: ServerMessage) -> bool {
        match self.registry.lookup_by_user(user_id).await {
            Some(session) => {
                if session.outbound.send(message).await.is_err() {
                    debug!(%user_id, "dropping message for closed session");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Send to both participants of a match.
    pub async fn broadcast_to_match(&self, players: [UserId; 2], message: ServerMessage) {
        for player in players {
            self.send_to_user(player, message.clone()).await;
        }
    }

    /// Send to a snapshot of lobby members.
    pub async fn broadcast_to_lobby(&self, members: &[UserId], message: ServerMessage) {
        for member in members {
            self.send_to_user(*member, message.clone()).await;
        }
    }

    /// Send to the user's friends that are currently online. Store
    /// failures log and deliver to nobody.
    pub async fn broadcast_to_friends(&self, user_id: UserId, message: ServerMessage) {
        let friends = match self.store.friends_of(user_id).await {
            Ok(friends) => friends,
            Err(e) => {
                debug!(%user_id, error = %e, "friend lookup failed, skipping fan-out");
                return;
            }
        };

        for friend in friends {
            if let Some(session) = self.registry.lookup_by_user(friend).await {
                if session.status != UserStatus::Offline {
                    let _ = session.outbound.send(message.clone()).await;
                }
            }
        }
    }
}
