//! Store Interface
//!
//! The core's only dependency on the durable world. Everything behind this
//! trait is plain I/O: users, stats, the question bank, match rows, answer
//! rows, lobby rows, friendships, and the settlement hooks (notifications,
//! achievements, missions). No game rules live here.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::ids::{LobbyId, MatchId, UserId};

pub use memory::MemoryStore;

/// Storage errors. Anything that isn't a well-defined absence is
/// `Backend` and surfaces to clients as `INTERNAL_ERROR`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A user row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user identifier.
    pub id: UserId,
    /// Display name shown to opponents.
    pub display_name: String,
    /// Account creation time.
    pub created_at: DateTime<Utc>,
}

/// Persistent per-user counters. Mutated only by the settlement pipeline
/// through [`Store::apply_stats_delta`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    /// Owner.
    pub user_id: UserId,
    /// Elo-style rating, ranked matches only. Never below zero.
    pub rating: i32,
    /// Matches won.
    pub wins: u32,
    /// Matches lost.
    pub losses: u32,
    /// Matches drawn.
    pub draws: u32,
    /// Matches played.
    pub total_games: u32,
    /// Current win streak.
    pub current_streak: u32,
    /// Best win streak ever.
    pub best_streak: u32,
    /// Correct answers across all matches.
    pub correct: u32,
    /// Answers submitted across all matches.
    pub total_answered: u32,
    /// Derived level (1 + xp / 1000).
    pub level: u32,
    /// Accumulated experience.
    pub xp: u32,
    /// Soft currency balance.
    pub coins: u32,
}

impl UserStats {
    /// Fresh stats for a new user.
    pub fn fresh(user_id: UserId) -> Self {
        Self {
            user_id,
            rating: 1000,
            wins: 0,
            losses: 0,
            draws: 0,
            total_games: 0,
            current_streak: 0,
            best_streak: 0,
            correct: 0,
            total_answered: 0,
            level: 1,
            xp: 0,
            coins: 0,
        }
    }
}

/// How a settlement touches the win/loss counters and streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Player won: wins+1, streak+1.
    Win,
    /// Player lost: losses+1, streak reset.
    Loss,
    /// Draw: draws+1, streak untouched.
    Draw,
}

/// Counter delta applied atomically by [`Store::apply_stats_delta`].
#[derive(Debug, Clone)]
pub struct StatsDelta {
    /// Outcome for the win/loss/draw counters and streak handling.
    pub result: MatchResult,
    /// Correct answers this match.
    pub correct: u32,
    /// Answers submitted this match.
    pub answered: u32,
    /// Experience credited.
    pub xp: u32,
    /// Coins credited.
    pub coins: u32,
    /// Rating change (ranked only; may be negative). The store clamps the
    /// resulting rating at zero.
    pub rating_change: i32,
}

/// A question with its canonical correct index. Only ever held
/// server-side; the wire carries a redacted view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// Question identifier.
    pub id: Uuid,
    /// Question text.
    pub text: String,
    /// Answer choices, in display order.
    pub choices: Vec<String>,
    /// Index of the correct choice.
    pub correct_index: usize,
    /// Difficulty label ("easy", "medium", "hard").
    pub difficulty: String,
    /// Category label, or "all".
    pub category: String,
}

/// Lifecycle of a persisted match row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRowStatus {
    /// Created at pairing, awaiting confirmation or start.
    Pending,
    /// Being played.
    Playing,
    /// Settled.
    Finished,
    /// Declined, timed out, or aborted before play.
    Cancelled,
}

/// A persisted match row.
#[derive(Debug, Clone)]
pub struct MatchRow {
    /// Match identifier.
    pub id: MatchId,
    /// The two participants.
    pub players: [UserId; 2],
    /// Match mode label ("casual", "ranked", "friend").
    pub mode: String,
    /// Difficulty filter used.
    pub difficulty: String,
    /// Category filter used.
    pub category: String,
    /// Row status.
    pub status: MatchRowStatus,
    /// Winner, once finished.
    pub winner: Option<UserId>,
    /// Final healths, once finished.
    pub healths: Option<[i32; 2]>,
    /// Final display scores, once finished.
    pub scores: Option<[u32; 2]>,
    /// Question ids served, in order.
    pub question_ids: Vec<Uuid>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// When play began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the match finished.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Partial update applied to a match row. `None` fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct MatchRowUpdate {
    /// New status.
    pub status: Option<MatchRowStatus>,
    /// Winner.
    pub winner: Option<UserId>,
    /// Final healths.
    pub healths: Option<[i32; 2]>,
    /// Final display scores.
    pub scores: Option<[u32; 2]>,
    /// Question order, recorded at start.
    pub question_ids: Option<Vec<Uuid>>,
    /// Play start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time.
    pub finished_at: Option<DateTime<Utc>>,
}

/// A persisted answer row. Unique on `(match_id, user_id, question_index)`.
#[derive(Debug, Clone)]
pub struct AnswerRow {
    /// Match the answer belongs to.
    pub match_id: MatchId,
    /// Answering player.
    pub user_id: UserId,
    /// Question position inside the match.
    pub question_index: usize,
    /// Choice the player picked.
    pub chosen_index: usize,
    /// Whether the choice was correct.
    pub correct: bool,
    /// Client-reported answer time in milliseconds.
    pub answer_time_ms: u64,
    /// Server receipt time.
    pub answered_at: DateTime<Utc>,
}

/// A persisted lobby row.
#[derive(Debug, Clone)]
pub struct LobbyRow {
    /// Lobby identifier.
    pub id: LobbyId,
    /// Join code.
    pub code: String,
    /// Current host.
    pub host: UserId,
    /// Whether the lobby is hidden from the public listing.
    pub is_private: bool,
    /// Member capacity.
    pub max_players: usize,
    /// Status label ("waiting", "starting", "in_game", "finished").
    pub status: String,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// A notification row emitted by settlement hooks.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    /// Recipient.
    pub user_id: UserId,
    /// Notification kind label.
    pub kind: String,
    /// Human-readable body.
    pub body: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Snapshot handed to the achievement and mission hooks after settlement
/// has applied the counter deltas. Opaque to the core beyond construction.
#[derive(Debug, Clone)]
pub struct MatchOutcomeEvent {
    /// Match that produced the event.
    pub match_id: MatchId,
    /// Player the event concerns.
    pub user_id: UserId,
    /// Whether this player won.
    pub won: bool,
    /// Correct answers this match.
    pub correct: u32,
    /// Questions in the match.
    pub total_questions: u32,
    /// Stats AFTER the settlement delta was applied.
    pub stats: UserStats,
}

/// Thin, typed access to the relational backing store.
///
/// Implementations must be safe to call concurrently. The unique-answer
/// constraint of `insert_answer` is the store's responsibility.
#[async_trait]
pub trait Store: Send + Sync {
    // -- users ---------------------------------------------------------

    /// Look up a user by id.
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Look up a user by display name.
    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Insert or replace a user row.
    async fn upsert_user(&self, user: UserRecord) -> Result<(), StoreError>;

    // -- stats ---------------------------------------------------------

    /// Fetch a user's stats, creating fresh stats if none exist.
    async fn get_stats(&self, user: UserId) -> Result<UserStats, StoreError>;

    /// Atomically apply a settlement delta and return the updated stats.
    async fn apply_stats_delta(
        &self,
        user: UserId,
        delta: StatsDelta,
    ) -> Result<UserStats, StoreError>;

    // -- questions -----------------------------------------------------

    /// Uniformly sample up to `count` distinct questions matching the
    /// difficulty and category filters ("all" is a wildcard).
    async fn random_questions(
        &self,
        difficulty: &str,
        category: &str,
        count: usize,
    ) -> Result<Vec<QuestionRecord>, StoreError>;

    // -- matches -------------------------------------------------------

    /// Insert a match row.
    async fn insert_match(&self, row: MatchRow) -> Result<(), StoreError>;

    /// Apply a partial update to a match row. Unknown ids are ignored.
    async fn update_match(&self, id: MatchId, update: MatchRowUpdate) -> Result<(), StoreError>;

    /// Insert an answer row. Returns `false` without writing when a row
    /// with the same `(match_id, user_id, question_index)` already exists.
    async fn insert_answer(&self, row: AnswerRow) -> Result<bool, StoreError>;

    // -- lobbies -------------------------------------------------------

    /// Insert a lobby row.
    async fn insert_lobby(&self, row: LobbyRow) -> Result<(), StoreError>;

    /// Replace a lobby row (status/host changes).
    async fn update_lobby(&self, row: LobbyRow) -> Result<(), StoreError>;

    /// Delete a lobby row and its membership rows.
    async fn delete_lobby(&self, id: LobbyId) -> Result<(), StoreError>;

    /// Add a membership row.
    async fn add_lobby_member(&self, lobby: LobbyId, user: UserId) -> Result<(), StoreError>;

    /// Remove a membership row.
    async fn remove_lobby_member(&self, lobby: LobbyId, user: UserId) -> Result<(), StoreError>;

    // -- social --------------------------------------------------------

    /// Ids of the user's friends.
    async fn friends_of(&self, user: UserId) -> Result<Vec<UserId>, StoreError>;

    /// Persist a notification.
    async fn push_notification(&self, row: NotificationRow) -> Result<(), StoreError>;

    /// Hand a settled outcome to the achievement system.
    async fn record_achievement_event(&self, event: MatchOutcomeEvent) -> Result<(), StoreError>;

    /// Hand a settled outcome to the mission system.
    async fn record_mission_event(&self, event: MatchOutcomeEvent) -> Result<(), StoreError>;
}

/// Whether a stored label matches a requested filter, treating "all" as a
/// wildcard on either side.
pub fn label_matches(stored: &str, requested: &str) -> bool {
    stored == requested || stored == "all" || requested == "all"
}
