//! In-Memory Store
//!
//! BTreeMap-backed implementation of [`Store`] used by the binary when no
//! external database is wired in, and by the test suite. Enforces the same
//! contracts a relational backend would: atomic counter deltas and the
//! unique `(match, user, question_index)` answer constraint.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use crate::core::ids::{LobbyId, MatchId, UserId};

use super::{
    label_matches, AnswerRow, LobbyRow, MatchOutcomeEvent, MatchResult, MatchRow, MatchRowUpdate,
    NotificationRow, QuestionRecord, StatsDelta, Store, StoreError, UserRecord, UserStats,
};

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, UserRecord>,
    stats: BTreeMap<UserId, UserStats>,
    questions: Vec<QuestionRecord>,
    matches: BTreeMap<MatchId, MatchRow>,
    answers: BTreeMap<(MatchId, UserId, usize), AnswerRow>,
    lobbies: BTreeMap<LobbyId, LobbyRow>,
    lobby_members: BTreeSet<(LobbyId, UserId)>,
    friendships: BTreeSet<(UserId, UserId)>,
    notifications: Vec<NotificationRow>,
    achievement_events: Vec<MatchOutcomeEvent>,
    mission_events: Vec<MatchOutcomeEvent>,
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user together with fresh stats. Test and bootstrap helper.
    pub async fn seed_user(&self, id: UserId, display_name: &str) {
        let mut inner = self.inner.write().await;
        inner.users.insert(
            id,
            UserRecord {
                id,
                display_name: display_name.to_string(),
                created_at: Utc::now(),
            },
        );
        inner.stats.entry(id).or_insert_with(|| UserStats::fresh(id));
    }

    /// Seed a user with a specific starting rating.
    pub async fn seed_user_with_rating(&self, id: UserId, display_name: &str, rating: i32) {
        self.seed_user(id, display_name).await;
        let mut inner = self.inner.write().await;
        if let Some(stats) = inner.stats.get_mut(&id) {
            stats.rating = rating;
        }
    }

    /// Seed a question into the bank.
    pub async fn seed_question(&self, question: QuestionRecord) {
        self.inner.write().await.questions.push(question);
    }

    /// Seed a symmetric friendship.
    pub async fn seed_friendship(&self, a: UserId, b: UserId) {
        let mut inner = self.inner.write().await;
        inner.friendships.insert((a, b));
        inner.friendships.insert((b, a));
    }

    /// All answers persisted for a match, in insertion-key order.
    pub async fn answers_for_match(&self, id: MatchId) -> Vec<AnswerRow> {
        self.inner
            .read()
            .await
            .answers
            .iter()
            .filter(|((m, _, _), _)| *m == id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Fetch a match row (test helper).
    pub async fn match_row(&self, id: MatchId) -> Option<MatchRow> {
        self.inner.read().await.matches.get(&id).cloned()
    }

    /// Notifications recorded so far (test helper).
    pub async fn notifications(&self) -> Vec<NotificationRow> {
        self.inner.read().await.notifications.clone()
    }

    /// Achievement events recorded so far (test helper).
    pub async fn achievement_events(&self) -> Vec<MatchOutcomeEvent> {
        self.inner.read().await.achievement_events.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.display_name == name)
            .cloned())
    }

    async fn upsert_user(&self, user: UserRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let id = user.id;
        inner.users.insert(id, user);
        inner.stats.entry(id).or_insert_with(|| UserStats::fresh(id));
        Ok(())
    }

    async fn get_stats(&self, user: UserId) -> Result<UserStats, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .stats
            .entry(user)
            .or_insert_with(|| UserStats::fresh(user))
            .clone())
    }

    async fn apply_stats_delta(
        &self,
        user: UserId,
        delta: StatsDelta,
    ) -> Result<UserStats, StoreError> {
        let mut inner = self.inner.write().await;
        let stats = inner
            .stats
            .entry(user)
            .or_insert_with(|| UserStats::fresh(user));

        match delta.result {
            MatchResult::Win => {
                stats.wins += 1;
                stats.current_streak += 1;
                stats.best_streak = stats.best_streak.max(stats.current_streak);
            }
            MatchResult::Loss => {
                stats.losses += 1;
                stats.current_streak = 0;
            }
            MatchResult::Draw => {
                stats.draws += 1;
            }
        }
        stats.total_games += 1;
        stats.correct += delta.correct;
        stats.total_answered += delta.answered;
        stats.xp += delta.xp;
        stats.coins += delta.coins;
        stats.rating = (stats.rating + delta.rating_change).max(0);
        stats.level = 1 + stats.xp / 1000;

        Ok(stats.clone())
    }

    async fn random_questions(
        &self,
        difficulty: &str,
        category: &str,
        count: usize,
    ) -> Result<Vec<QuestionRecord>, StoreError> {
        let inner = self.inner.read().await;
        let pool: Vec<&QuestionRecord> = inner
            .questions
            .iter()
            .filter(|q| {
                label_matches(&q.difficulty, difficulty) && label_matches(&q.category, category)
            })
            .collect();

        let mut rng = rand::thread_rng();
        Ok(pool
            .choose_multiple(&mut rng, count.min(pool.len()))
            .map(|q| (*q).clone())
            .collect())
    }

    async fn insert_match(&self, row: MatchRow) -> Result<(), StoreError> {
        self.inner.write().await.matches.insert(row.id, row);
        Ok(())
    }

    async fn update_match(&self, id: MatchId, update: MatchRowUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(row) = inner.matches.get_mut(&id) {
            if let Some(status) = update.status {
                row.status = status;
            }
            if let Some(winner) = update.winner {
                row.winner = Some(winner);
            }
            if let Some(healths) = update.healths {
                row.healths = Some(healths);
            }
            if let Some(scores) = update.scores {
                row.scores = Some(scores);
            }
            if let Some(question_ids) = update.question_ids {
                row.question_ids = question_ids;
            }
            if let Some(started_at) = update.started_at {
                row.started_at = Some(started_at);
            }
            if let Some(finished_at) = update.finished_at {
                row.finished_at = Some(finished_at);
            }
        }
        Ok(())
    }

    async fn insert_answer(&self, row: AnswerRow) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (row.match_id, row.user_id, row.question_index);
        if inner.answers.contains_key(&key) {
            return Ok(false);
        }
        inner.answers.insert(key, row);
        Ok(true)
    }

    async fn insert_lobby(&self, row: LobbyRow) -> Result<(), StoreError> {
        self.inner.write().await.lobbies.insert(row.id, row);
        Ok(())
    }

    async fn update_lobby(&self, row: LobbyRow) -> Result<(), StoreError> {
        self.inner.write().await.lobbies.insert(row.id, row);
        Ok(())
    }

    async fn delete_lobby(&self, id: LobbyId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.lobbies.remove(&id);
        inner.lobby_members.retain(|(lobby, _)| *lobby != id);
        Ok(())
    }

    async fn add_lobby_member(&self, lobby: LobbyId, user: UserId) -> Result<(), StoreError> {
        self.inner.write().await.lobby_members.insert((lobby, user));
        Ok(())
    }

    async fn remove_lobby_member(&self, lobby: LobbyId, user: UserId) -> Result<(), StoreError> {
        self.inner.write().await.lobby_members.remove(&(lobby, user));
        Ok(())
    }

    async fn friends_of(&self, user: UserId) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .friendships
            .iter()
            .filter(|(a, _)| *a == user)
            .map(|(_, b)| *b)
            .collect())
    }

    async fn push_notification(&self, row: NotificationRow) -> Result<(), StoreError> {
        self.inner.write().await.notifications.push(row);
        Ok(())
    }

    async fn record_achievement_event(&self, event: MatchOutcomeEvent) -> Result<(), StoreError> {
        self.inner.write().await.achievement_events.push(event);
        Ok(())
    }

    async fn record_mission_event(&self, event: MatchOutcomeEvent) -> Result<(), StoreError> {
        self.inner.write().await.mission_events.push(event);
        Ok(())
    }
}
