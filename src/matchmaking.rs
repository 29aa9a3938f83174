//! Matchmaking
//!
//! Queue management, pair selection, and the two-phase ready confirmation
//! between pairing and match start. The queue and the pending-confirmation
//! table are each guarded by their own lock; store reads happen before the
//! locks are taken.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::core::ids::{MatchId, UserId};
use crate::core::timer::{schedule, TimerHandle};
use crate::game::engine::{self, MatchCommand};
use crate::game::state::{MatchMode, MatchSettings, MatchState};
use crate::network::protocol::{
    ConfirmRequestPayload, ConfirmStatus, ConfirmStatusPayload, ErrorCode,
    MatchmakingCancelledPayload, PlayerInfo, SearchingPayload, ServerMessage, UserStatus,
};
use crate::store::{label_matches, MatchRow, MatchRowStatus, MatchRowUpdate, Store};

/// Queue entries older than this get a searching refresh in the sweep.
const STALE_ENTRY_AGE: Duration = Duration::from_secs(120);

/// Matchmaking operation errors, each with a wire code.
#[derive(Debug, Error)]
pub enum MatchmakingError {
    /// Caller already holds a match, lobby, or pending pairing.
    #[error("already in a game, lobby, or pending match")]
    AlreadyInGame,
    /// No pending pairing with that id.
    #[error("match not found or confirmation expired")]
    MatchNotFound,
    /// Caller is not part of the pairing.
    #[error("not a participant of this match")]
    NotInMatch,
}

impl MatchmakingError {
    /// Wire error code for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MatchmakingError::AlreadyInGame => ErrorCode::AlreadyInGame,
            MatchmakingError::MatchNotFound => ErrorCode::MatchNotFound,
            MatchmakingError::NotInMatch => ErrorCode::NotInMatch,
        }
    }
}

/// One user waiting to be paired.
#[derive(Debug, Clone)]
struct QueueEntry {
    user_id: UserId,
    display_name: String,
    mode: MatchMode,
    difficulty: String,
    category: String,
    rating: i32,
    enqueued_at: Instant,
}

/// A pairing awaiting both confirmations.
struct PendingConfirmation {
    players: [UserId; 2],
    confirmed: [bool; 2],
    timer: TimerHandle,
}

/// The matchmaking service.
pub struct Matchmaker {
    ctx: AppContext,
    queue: Mutex<Vec<QueueEntry>>,
    pending: Mutex<BTreeMap<MatchId, PendingConfirmation>>,
}

impl Matchmaker {
    /// Build the matchmaker over the shared context.
    pub fn new(ctx: AppContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            queue: Mutex::new(Vec::new()),
            pending: Mutex::new(BTreeMap::new()),
        })
    }

    /// Handle `matchmaking.find`: enqueue the caller or pair them with a
    /// waiting opponent.
    pub async fn find(
        self: &Arc<Self>,
        user_id: UserId,
        mode: MatchMode,
        difficulty: String,
        category: String,
    ) -> Result<(), MatchmakingError> {
        let Some(session) = self.ctx.registry.lookup_by_user(user_id).await else {
            return Ok(());
        };
        if session.current_match.is_some() || session.current_lobby.is_some() {
            return Err(MatchmakingError::AlreadyInGame);
        }

        // stats read happens before the queue lock
        let rating = match self.ctx.store.get_stats(user_id).await {
            Ok(stats) => stats.rating,
            Err(e) => {
                warn!(%user_id, error = %e, "stats read failed, defaulting rating");
                1000
            }
        };

        let entry = QueueEntry {
            user_id,
            display_name: session.display_name.clone(),
            mode,
            difficulty,
            category,
            rating,
            enqueued_at: Instant::now(),
        };

        let (matched, queue_len) = {
            let mut queue = self.queue.lock().await;

            if queue.iter().any(|e| e.user_id == user_id) {
                // duplicate find refreshes the searching notice
                (None, queue.len())
            } else {
                match select_opponent(&queue, &entry) {
                    Some(index) => {
                        let opponent = queue.remove(index);
                        (Some(opponent), queue.len())
                    }
                    None => {
                        queue.push(entry.clone());
                        (None, queue.len())
                    }
                }
            }
        };

        match matched {
            Some(opponent) => self.create_pairing(entry, opponent).await,
            None => {
                self.ctx
                    .router
                    .send_to_user(
                        user_id,
                        ServerMessage::Searching(SearchingPayload {
                            players_in_queue: queue_len,
                            estimated_wait_time: 30,
                        }),
                    )
                    .await;
                Ok(())
            }
        }
    }

    async fn create_pairing(
        self: &Arc<Self>,
        caller: QueueEntry,
        opponent: QueueEntry,
    ) -> Result<(), MatchmakingError> {
        let match_id = MatchId::generate();
        let settings = MatchSettings {
            mode: caller.mode,
            difficulty: caller.difficulty.clone(),
            category: caller.category.clone(),
            total_questions: self.ctx.config.total_questions,
            time_per_question_secs: self.ctx.config.question_time_secs,
        };

        // the earlier-queued player takes slot A
        let (a, b) = (&opponent, &caller);

        if let Err(e) = self
            .ctx
            .store
            .insert_match(MatchRow {
                id: match_id,
                players: [a.user_id, b.user_id],
                mode: settings.mode.as_str().into(),
                difficulty: settings.difficulty.clone(),
                category: settings.category.clone(),
                status: MatchRowStatus::Pending,
                winner: None,
                healths: None,
                scores: None,
                question_ids: vec![],
                created_at: chrono::Utc::now(),
                started_at: None,
                finished_at: None,
            })
            .await
        {
            warn!(%match_id, error = %e, "match row insert failed");
        }

        let state = MatchState::new(
            match_id,
            settings.clone(),
            (a.user_id, a.display_name.clone()),
            (b.user_id, b.display_name.clone()),
        );
        engine::spawn_match(&self.ctx, state).await;

        // a pending pairing occupies the session like a live match
        for user in [a.user_id, b.user_id] {
            self.ctx
                .registry
                .set_current_match(user, Some(match_id))
                .await;
        }

        // insert and schedule under the same lock so the expiry task can
        // never observe the table without this entry
        {
            let mut pending = self.pending.lock().await;
            let deadline = self.ctx.config.confirm_deadline();
            let mm = self.clone();
            let timer = schedule(deadline, async move {
                mm.handle_confirm_timeout(match_id).await;
            });
            pending.insert(
                match_id,
                PendingConfirmation {
                    players: [a.user_id, b.user_id],
                    confirmed: [false, false],
                    timer,
                },
            );
        }

        for (user, other) in [(a, b), (b, a)] {
            self.ctx
                .router
                .send_to_user(
                    user.user_id,
                    ServerMessage::ConfirmRequest(ConfirmRequestPayload {
                        match_id,
                        opponent: PlayerInfo {
                            user_id: other.user_id,
                            display_name: other.display_name.clone(),
                        },
                        settings: settings.clone(),
                        deadline_secs: self.ctx.config.confirm_timeout_secs,
                    }),
                )
                .await;
        }

        info!(
            %match_id,
            player_a = %a.user_id,
            player_b = %b.user_id,
            mode = settings.mode.as_str(),
            "players paired, awaiting confirmation"
        );
        Ok(())
    }

    /// Handle `matchmaking.confirm`.
    pub async fn confirm(
        self: &Arc<Self>,
        user_id: UserId,
        match_id: MatchId,
        confirmed: bool,
    ) -> Result<(), MatchmakingError> {
        let resolution = {
            let mut pending = self.pending.lock().await;
            let Some(entry) = pending.get_mut(&match_id) else {
                return Err(MatchmakingError::MatchNotFound);
            };
            let Some(slot) = entry.players.iter().position(|p| *p == user_id) else {
                return Err(MatchmakingError::NotInMatch);
            };

            if !confirmed {
                pending
                    .remove(&match_id)
                    .map(|entry| (entry, ConfirmStatus::Declined))
            } else {
                // repeat confirms from the same player count once
                entry.confirmed[slot] = true;
                if entry.confirmed.iter().all(|c| *c) {
                    pending
                        .remove(&match_id)
                        .map(|entry| (entry, ConfirmStatus::BothConfirmed))
                } else {
                    None
                }
            }
        };

        match resolution {
            Some((entry, ConfirmStatus::BothConfirmed)) => {
                entry.timer.cancel();
                self.launch_confirmed(match_id, entry.players).await;
            }
            Some((entry, status)) => {
                entry.timer.cancel();
                self.cancel_pairing(match_id, entry.players, status).await;
            }
            None => {
                // first of the two confirmations
                self.ctx
                    .router
                    .send_to_user(
                        user_id,
                        ServerMessage::ConfirmStatusUpdate(ConfirmStatusPayload {
                            match_id,
                            status: ConfirmStatus::WaitingOpponent,
                        }),
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn launch_confirmed(&self, match_id: MatchId, players: [UserId; 2]) {
        self.ctx
            .router
            .broadcast_to_match(
                players,
                ServerMessage::ConfirmStatusUpdate(ConfirmStatusPayload {
                    match_id,
                    status: ConfirmStatus::BothConfirmed,
                }),
            )
            .await;

        for user in players {
            self.ctx.registry.update_status(user, UserStatus::InGame).await;
        }

        if let Some(handle) = self.ctx.matches.get(match_id).await {
            let delay = Duration::from_secs(self.ctx.config.start_delay_secs);
            schedule(delay, async move {
                handle.send(MatchCommand::Start).await;
            });
        }

        info!(%match_id, "both confirmed, start scheduled");
    }

    async fn cancel_pairing(&self, match_id: MatchId, players: [UserId; 2], status: ConfirmStatus) {
        self.ctx
            .router
            .broadcast_to_match(
                players,
                ServerMessage::ConfirmStatusUpdate(ConfirmStatusPayload { match_id, status }),
            )
            .await;

        if let Err(e) = self
            .ctx
            .store
            .update_match(
                match_id,
                MatchRowUpdate {
                    status: Some(MatchRowStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(%match_id, error = %e, "match row cancel failed");
        }

        for user in players {
            self.ctx.registry.set_current_match(user, None).await;
            self.ctx.registry.update_status(user, UserStatus::Online).await;
        }

        if let Some(handle) = self.ctx.matches.get(match_id).await {
            handle.send(MatchCommand::Cancel).await;
        }
        self.ctx.matches.remove(match_id).await;

        info!(%match_id, ?status, "pairing cancelled");
    }

    async fn handle_confirm_timeout(self: Arc<Self>, match_id: MatchId) {
        let entry = self.pending.lock().await.remove(&match_id);
        if let Some(entry) = entry {
            self.cancel_pairing(match_id, entry.players, ConfirmStatus::Timeout)
                .await;
        }
    }

    /// Handle `matchmaking.cancel`.
    pub async fn cancel(&self, user_id: UserId) {
        let removed = {
            let mut queue = self.queue.lock().await;
            let before = queue.len();
            queue.retain(|e| e.user_id != user_id);
            before != queue.len()
        };

        if removed {
            debug!(%user_id, "left the matchmaking queue");
        }
        self.ctx
            .router
            .send_to_user(
                user_id,
                ServerMessage::MatchmakingCancelled(MatchmakingCancelledPayload { user_id }),
            )
            .await;
    }

    /// Disconnect cleanup: drop the queue entry and resolve any pending
    /// pairing as a decline.
    pub async fn remove_user(self: &Arc<Self>, user_id: UserId) {
        self.queue.lock().await.retain(|e| e.user_id != user_id);

        let abandoned = {
            let mut pending = self.pending.lock().await;
            let match_id = pending
                .iter()
                .find(|(_, p)| p.players.contains(&user_id))
                .map(|(id, _)| *id);
            match_id.and_then(|id| pending.remove(&id).map(|p| (id, p)))
        };

        if let Some((match_id, entry)) = abandoned {
            entry.timer.cancel();
            self.cancel_pairing(match_id, entry.players, ConfirmStatus::Declined)
                .await;
        }
    }

    /// Current queue depth.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Periodic sweep: refresh the searching notice for entries that have
    /// waited a long time, so their clients see the live queue depth.
    pub async fn sweep_stale(&self) {
        let stale: Vec<(UserId, usize)> = {
            let queue = self.queue.lock().await;
            let now = Instant::now();
            let depth = queue.len();
            queue
                .iter()
                .filter(|e| now.duration_since(e.enqueued_at) > STALE_ENTRY_AGE)
                .map(|e| (e.user_id, depth))
                .collect()
        };

        for (user_id, depth) in stale {
            self.ctx
                .router
                .send_to_user(
                    user_id,
                    ServerMessage::Searching(SearchingPayload {
                        players_in_queue: depth,
                        estimated_wait_time: 30,
                    }),
                )
                .await;
        }
    }
}

/// Pick an opponent for `candidate` from the queue, or `None`.
///
/// Casual/friend: first entry with the same mode and difficulty whose
/// category matches (with "all" as a wildcard on either side). Ranked:
/// nearest rating, preferring the configured window but falling back to
/// the closest overall so sparse queues still pair.
fn select_opponent(queue: &[QueueEntry], candidate: &QueueEntry) -> Option<usize> {
    match candidate.mode {
        MatchMode::Ranked => {
            let mut best: Option<(usize, i32)> = None;
            for (i, entry) in queue.iter().enumerate() {
                if entry.mode != MatchMode::Ranked || entry.user_id == candidate.user_id {
                    continue;
                }
                let distance = (entry.rating - candidate.rating).abs();
                if best.map(|(_, d)| distance < d).unwrap_or(true) {
                    best = Some((i, distance));
                }
            }
            best.map(|(i, _)| i)
        }
        _ => queue.iter().position(|entry| {
            entry.user_id != candidate.user_id
                && entry.mode == candidate.mode
                && entry.difficulty == candidate.difficulty
                && label_matches(&entry.category, &candidate.category)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::ids::SessionId;
    use crate::network::session::Session;
    use crate::store::{MemoryStore, QuestionRecord};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn test_config() -> ServerConfig {
        ServerConfig {
            confirm_timeout_secs: 30,
            start_delay_secs: 0,
            ..Default::default()
        }
    }

    async fn setup(config: ServerConfig) -> (AppContext, Arc<MemoryStore>, Arc<Matchmaker>) {
        let store = Arc::new(MemoryStore::new());
        let ctx = AppContext::new(config, store.clone());
        let mm = Matchmaker::new(ctx.clone());
        for _ in 0..5 {
            store
                .seed_question(QuestionRecord {
                    id: Uuid::new_v4(),
                    text: "?".into(),
                    choices: vec!["a".into(), "b".into()],
                    correct_index: 0,
                    difficulty: "easy".into(),
                    category: "all".into(),
                })
                .await;
        }
        (ctx, store, mm)
    }

    async fn connect(
        ctx: &AppContext,
        store: &MemoryStore,
        name: &str,
        rating: i32,
    ) -> (UserId, mpsc::Receiver<ServerMessage>) {
        let user = UserId::generate();
        store.seed_user_with_rating(user, name, rating).await;
        let (tx, rx) = mpsc::channel(32);
        ctx.registry
            .register(Session::new(SessionId::generate(), user, name.into(), tx))
            .await;
        (user, rx)
    }

    async fn drain_find(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_first_find_searches() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();

        let msgs = drain_find(&mut rx_a).await;
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::Searching(p) if p.players_in_queue == 1)));
        assert_eq!(mm.queue_len().await, 1);
    }

    #[tokio::test]
    async fn test_casual_pairing_sends_confirm_requests() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;
        let (b, mut rx_b) = connect(&ctx, &store, "bob", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        mm.find(b, MatchMode::Casual, "easy".into(), "history".into())
            .await
            .unwrap();

        let msgs_a = drain_find(&mut rx_a).await;
        let msgs_b = drain_find(&mut rx_b).await;
        assert!(msgs_a
            .iter()
            .any(|m| matches!(m, ServerMessage::ConfirmRequest(_))));
        assert!(msgs_b
            .iter()
            .any(|m| matches!(m, ServerMessage::ConfirmRequest(_))));
        assert_eq!(mm.queue_len().await, 0);
        assert_eq!(ctx.matches.count().await, 1);
    }

    #[tokio::test]
    async fn test_category_mismatch_keeps_both_queued() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, _rx_a) = connect(&ctx, &store, "alice", 1000).await;
        let (b, _rx_b) = connect(&ctx, &store, "bob", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "history".into())
            .await
            .unwrap();
        mm.find(b, MatchMode::Casual, "easy".into(), "science".into())
            .await
            .unwrap();

        assert_eq!(mm.queue_len().await, 2);
    }

    #[test]
    fn test_ranked_selection_prefers_nearest_rating() {
        let entry = |user_id, mode, rating| QueueEntry {
            user_id,
            display_name: "p".into(),
            mode,
            difficulty: "all".into(),
            category: "all".into(),
            rating,
            enqueued_at: Instant::now(),
        };

        let far = UserId::generate();
        let near = UserId::generate();
        let casual = UserId::generate();
        let queue = vec![
            entry(far, MatchMode::Ranked, 2400),
            entry(casual, MatchMode::Casual, 1500),
            entry(near, MatchMode::Ranked, 1550),
        ];

        let caller = entry(UserId::generate(), MatchMode::Ranked, 1500);
        let picked = select_opponent(&queue, &caller).unwrap();
        assert_eq!(queue[picked].user_id, near);
    }

    #[tokio::test]
    async fn test_ranked_falls_back_to_closest_overall() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (far, _rx1) = connect(&ctx, &store, "far", 2400).await;
        let (caller, mut rx2) = connect(&ctx, &store, "caller", 1000).await;

        mm.find(far, MatchMode::Ranked, "all".into(), "all".into())
            .await
            .unwrap();
        mm.find(caller, MatchMode::Ranked, "all".into(), "all".into())
            .await
            .unwrap();

        let msgs = drain_find(&mut rx2).await;
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::ConfirmRequest(_))));
    }

    #[tokio::test]
    async fn test_both_confirm_launches_match() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;
        let (b, mut rx_b) = connect(&ctx, &store, "bob", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        mm.find(b, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();

        let match_id = drain_find(&mut rx_a)
            .await
            .iter()
            .find_map(|m| match m {
                ServerMessage::ConfirmRequest(p) => Some(p.match_id),
                _ => None,
            })
            .unwrap();

        // duplicate confirm from the same player counts once
        mm.confirm(a, match_id, true).await.unwrap();
        mm.confirm(a, match_id, true).await.unwrap();
        let msgs = drain_find(&mut rx_a).await;
        assert!(msgs.iter().all(|m| !matches!(
            m,
            ServerMessage::ConfirmStatusUpdate(p) if p.status == ConfirmStatus::BothConfirmed
        )));

        mm.confirm(b, match_id, true).await.unwrap();
        let msgs = drain_find(&mut rx_b).await;
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::ConfirmStatusUpdate(p) if p.status == ConfirmStatus::BothConfirmed
        )));

        // statuses flip to in_game
        let session = ctx.registry.lookup_by_user(a).await.unwrap();
        assert_eq!(session.status, UserStatus::InGame);
    }

    #[tokio::test]
    async fn test_decline_cancels_pairing() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;
        let (b, mut rx_b) = connect(&ctx, &store, "bob", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        mm.find(b, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        let match_id = drain_find(&mut rx_a)
            .await
            .iter()
            .find_map(|m| match m {
                ServerMessage::ConfirmRequest(p) => Some(p.match_id),
                _ => None,
            })
            .unwrap();

        mm.confirm(b, match_id, false).await.unwrap();

        let msgs = drain_find(&mut rx_a).await;
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::ConfirmStatusUpdate(p) if p.status == ConfirmStatus::Declined
        )));
        drain_find(&mut rx_b).await;

        // row cancelled, sessions restored, match gone
        let row = store.match_row(match_id).await.unwrap();
        assert_eq!(row.status, MatchRowStatus::Cancelled);
        let session = ctx.registry.lookup_by_user(a).await.unwrap();
        assert_eq!(session.status, UserStatus::Online);
        assert!(session.current_match.is_none());
        assert!(ctx.matches.get(match_id).await.is_none());

        // late confirm hits MATCH_NOT_FOUND
        let err = mm.confirm(a, match_id, true).await.unwrap_err();
        assert!(matches!(err, MatchmakingError::MatchNotFound));
    }

    #[tokio::test]
    async fn test_confirmation_timeout_cleanup() {
        // only one side confirms inside the window
        let mut config = test_config();
        config.confirm_timeout_secs = 0;
        let (ctx, store, mm) = setup(config).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;
        let (b, _rx_b) = connect(&ctx, &store, "bob", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        mm.find(b, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let msgs = drain_find(&mut rx_a).await;
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::ConfirmStatusUpdate(p) if p.status == ConfirmStatus::Timeout
        )));

        let session = ctx.registry.lookup_by_user(a).await.unwrap();
        assert_eq!(session.status, UserStatus::Online);
        assert_eq!(mm.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_already_in_game_rejected() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, _rx_a) = connect(&ctx, &store, "alice", 1000).await;
        ctx.registry
            .set_current_match(a, Some(MatchId::generate()))
            .await;

        let err = mm
            .find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap_err();
        assert!(matches!(err, MatchmakingError::AlreadyInGame));
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        assert_eq!(mm.queue_len().await, 1);

        mm.cancel(a).await;
        assert_eq!(mm.queue_len().await, 0);
        let msgs = drain_find(&mut rx_a).await;
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::MatchmakingCancelled(_))));
    }

    #[tokio::test]
    async fn test_disconnect_resolves_pending_pairing() {
        let (ctx, store, mm) = setup(test_config()).await;
        let (a, mut rx_a) = connect(&ctx, &store, "alice", 1000).await;
        let (b, _rx_b) = connect(&ctx, &store, "bob", 1000).await;

        mm.find(a, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        mm.find(b, MatchMode::Casual, "easy".into(), "all".into())
            .await
            .unwrap();
        drain_find(&mut rx_a).await;

        mm.remove_user(b).await;

        let msgs = drain_find(&mut rx_a).await;
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::ConfirmStatusUpdate(p) if p.status == ConfirmStatus::Declined
        )));
    }
}
