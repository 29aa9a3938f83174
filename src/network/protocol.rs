//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every frame
//! is a UTF-8 JSON envelope `{"type": "...", "payload": {...}}`; the type
//! string selects the variant and the payload is decoded strictly against
//! that variant's struct. Unknown types and ill-typed payloads are
//! distinct, recoverable decode errors.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ids::{LobbyId, MatchId, SessionId, UserId};
use crate::game::state::{AnswerEntry, EndReason, MatchMode, MatchSettings};
use crate::store::QuestionRecord;

/// Presence status of a connected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Connected, not in a lobby or match.
    Online,
    /// Sitting in a lobby.
    InLobby,
    /// Playing a match.
    InGame,
    /// Connected but idle by choice.
    Away,
    /// Not connected.
    Offline,
}

/// Lobby lifecycle, mirrored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Accepting members.
    Waiting,
    /// Host pressed start; match being created.
    Starting,
    /// Members are playing.
    InGame,
    /// Closed.
    Finished,
}

/// Two-phase confirmation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStatus {
    /// One side confirmed, the other is pending.
    WaitingOpponent,
    /// Both confirmed; the match will start.
    BothConfirmed,
    /// A side declined.
    Declined,
    /// The 30 s window elapsed.
    Timeout,
}

/// Animation hint for the opponent's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Animation {
    /// Opponent answered correctly; you take the hit.
    Attack,
    /// Opponent answered wrong; they hurt themselves.
    Hurt,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server. Every payload carries the sender's
/// `userId`, which must match the session's authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Authenticate the socket.
    #[serde(rename = "auth:connect")]
    AuthConnect(AuthConnectPayload),

    /// Keepalive.
    #[serde(rename = "connection.ping")]
    Ping(PingPayload),

    /// Re-attach this socket to a live match in its waiting phase.
    #[serde(rename = "connection.reconnect")]
    Reconnect(ReconnectPayload),

    /// Change presence status.
    #[serde(rename = "user.status.update")]
    StatusUpdate(StatusUpdatePayload),

    /// Enter the matchmaking queue.
    #[serde(rename = "matchmaking.find")]
    FindMatch(FindMatchPayload),

    /// Leave the matchmaking queue.
    #[serde(rename = "matchmaking.cancel")]
    CancelMatchmaking(CancelMatchmakingPayload),

    /// Answer a pairing confirmation request.
    #[serde(rename = "matchmaking.confirm")]
    ConfirmMatch(ConfirmMatchPayload),

    /// Create a private lobby.
    #[serde(rename = "lobby.create")]
    CreateLobby(CreateLobbyPayload),

    /// Join a lobby by code.
    #[serde(rename = "lobby.join")]
    JoinLobby(JoinLobbyPayload),

    /// Toggle ready state in a lobby.
    #[serde(rename = "lobby.ready")]
    LobbyReady(LobbyReadyPayload),

    /// Host starts the lobby's match.
    #[serde(rename = "lobby.start")]
    StartLobby(StartLobbyPayload),

    /// Leave a lobby.
    #[serde(rename = "lobby.leave")]
    LeaveLobby(LeaveLobbyPayload),

    /// Host removes a member.
    #[serde(rename = "lobby.kick")]
    KickFromLobby(KickFromLobbyPayload),

    /// Request the public lobby listing.
    #[serde(rename = "lobby.list.sync")]
    SyncLobbyList(SyncLobbyListPayload),

    /// Attach to a created match (post-confirmation or post-lobby-start).
    #[serde(rename = "game.connect")]
    GameConnect(GameConnectPayload),

    /// Submit an answer for the current question.
    #[serde(rename = "game.answer.submit")]
    SubmitAnswer(SubmitAnswerPayload),
}

/// `auth:connect` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConnectPayload {
    /// Claimed user id; must match the token subject.
    pub user_id: UserId,
    /// Bearer token from the auth provider.
    pub token: String,
    /// Client version, for diagnostics.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// `connection.ping` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    /// Sender.
    pub user_id: UserId,
    /// Client timestamp, echoed back for RTT measurement.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// `connection.reconnect` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPayload {
    /// Sender.
    pub user_id: UserId,
    /// Match the client believes it belongs to.
    #[serde(default)]
    pub match_id: Option<MatchId>,
}

/// `user.status.update` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    /// Sender.
    pub user_id: UserId,
    /// Requested status. Only `online` and `away` are accepted.
    pub status: UserStatus,
}

/// `matchmaking.find` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMatchPayload {
    /// Sender.
    pub user_id: UserId,
    /// Queue to enter.
    pub mode: MatchMode,
    /// Difficulty filter.
    #[serde(default = "default_all")]
    pub difficulty: String,
    /// Category filter.
    #[serde(default = "default_all")]
    pub category: String,
}

/// `matchmaking.cancel` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelMatchmakingPayload {
    /// Sender.
    pub user_id: UserId,
}

/// `matchmaking.confirm` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmMatchPayload {
    /// Sender.
    pub user_id: UserId,
    /// Pairing being confirmed.
    pub match_id: MatchId,
    /// Accept or decline.
    pub confirmed: bool,
}

/// `lobby.create` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyPayload {
    /// Sender, becomes the host.
    pub user_id: UserId,
    /// Member capacity. Defaults to 2.
    #[serde(default)]
    pub max_players: Option<usize>,
    /// Hide from the public listing. Defaults to true.
    #[serde(default)]
    pub is_private: Option<bool>,
    /// Match settings for the lobby's game. Defaults are filled server-side.
    #[serde(default)]
    pub settings: Option<LobbySettingsPayload>,
}

/// Partial match settings accepted at lobby creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettingsPayload {
    /// Difficulty filter.
    #[serde(default)]
    pub difficulty: Option<String>,
    /// Category filter.
    #[serde(default)]
    pub category: Option<String>,
    /// Questions per match.
    #[serde(default)]
    pub total_questions: Option<usize>,
    /// Seconds per question.
    #[serde(default, rename = "timePerQuestionSec")]
    pub time_per_question_secs: Option<u64>,
}

/// `lobby.join` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyPayload {
    /// Sender.
    pub user_id: UserId,
    /// 6-character lobby code.
    pub code: String,
}

/// `lobby.ready` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyReadyPayload {
    /// Sender.
    pub user_id: UserId,
    /// Lobby in question.
    pub lobby_id: LobbyId,
    /// New ready state.
    pub ready: bool,
}

/// `lobby.start` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLobbyPayload {
    /// Sender; must be the host.
    pub user_id: UserId,
    /// Lobby to start.
    pub lobby_id: LobbyId,
}

/// `lobby.leave` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveLobbyPayload {
    /// Sender.
    pub user_id: UserId,
    /// Lobby to leave.
    pub lobby_id: LobbyId,
}

/// `lobby.kick` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickFromLobbyPayload {
    /// Sender; must be the host.
    pub user_id: UserId,
    /// Lobby in question.
    pub lobby_id: LobbyId,
    /// Member to remove.
    pub target_user_id: UserId,
}

/// `lobby.list.sync` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLobbyListPayload {
    /// Sender.
    pub user_id: UserId,
}

/// `game.connect` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConnectPayload {
    /// Sender.
    pub user_id: UserId,
    /// Match to attach to.
    pub match_id: MatchId,
}

/// `game.answer.submit` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
    /// Sender.
    pub user_id: UserId,
    /// Match being played.
    pub match_id: MatchId,
    /// Question id, for client-side sanity only.
    #[serde(default)]
    pub question_id: Option<Uuid>,
    /// Question position the answer targets.
    pub question_index: usize,
    /// Chosen choice index.
    pub chosen_index: usize,
    /// Milliseconds the client took to answer.
    pub answer_time_ms: u64,
}

fn default_all() -> String {
    "all".to_string()
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Authentication succeeded.
    #[serde(rename = "auth.connected")]
    AuthConnected(AuthConnectedPayload),

    /// Authentication failed; the socket will close.
    #[serde(rename = "auth.error")]
    AuthError(ErrorPayload),

    /// Keepalive reply.
    #[serde(rename = "connection.pong")]
    Pong(PongPayload),

    /// Reconnection accepted.
    #[serde(rename = "connection.reconnected")]
    Reconnected(ReconnectedPayload),

    /// Server is closing this session.
    #[serde(rename = "connection.disconnect")]
    Disconnect(DisconnectPayload),

    /// Queue entry accepted; still searching.
    #[serde(rename = "matchmaking.searching")]
    Searching(SearchingPayload),

    /// A pairing was found; confirm within the deadline.
    #[serde(rename = "matchmaking.confirm.request")]
    ConfirmRequest(ConfirmRequestPayload),

    /// Confirmation progress or outcome.
    #[serde(rename = "matchmaking.confirm.status")]
    ConfirmStatusUpdate(ConfirmStatusPayload),

    /// Queue entry removed.
    #[serde(rename = "matchmaking.cancelled")]
    MatchmakingCancelled(MatchmakingCancelledPayload),

    /// Lobby created; sender is the host.
    #[serde(rename = "lobby.created")]
    LobbyCreated(LobbyStatePayload),

    /// A member joined the lobby.
    #[serde(rename = "lobby.player.joined")]
    LobbyPlayerJoined(LobbyPlayerJoinedPayload),

    /// A member toggled ready.
    #[serde(rename = "lobby.player.ready")]
    LobbyPlayerReady(LobbyPlayerReadyPayload),

    /// The lobby's match is being created.
    #[serde(rename = "lobby.game.starting")]
    LobbyGameStarting(LobbyGameStartingPayload),

    /// A member left (or the lobby closed).
    #[serde(rename = "lobby.player_left")]
    LobbyPlayerLeft(LobbyPlayerLeftPayload),

    /// A member was kicked by the host.
    #[serde(rename = "lobby.player.kicked")]
    LobbyPlayerKicked(LobbyPlayerKickedPayload),

    /// Public lobby listing.
    #[serde(rename = "lobby.list.data")]
    LobbyListData(LobbyListDataPayload),

    /// Match started.
    #[serde(rename = "game.started")]
    GameStarted(GameStartedPayload),

    /// The full (redacted) question sequence.
    #[serde(rename = "game.questions.all")]
    GameQuestions(GameQuestionsPayload),

    /// Evaluation of the sender's own answer.
    #[serde(rename = "game.answer.received")]
    AnswerReceived(AnswerReceivedPayload),

    /// The opponent answered the current question.
    #[serde(rename = "game.opponent.answered")]
    OpponentAnswered(OpponentAnsweredPayload),

    /// Healths after an evaluation.
    #[serde(rename = "game.battle.update")]
    BattleUpdate(BattleUpdatePayload),

    /// The current question timed out.
    #[serde(rename = "game.question.timeout")]
    QuestionTimeout(QuestionTimeoutPayload),

    /// Match finished.
    #[serde(rename = "game.over")]
    GameOver(GameOverPayload),

    /// The opponent's socket closed mid-match.
    #[serde(rename = "game.player.disconnected")]
    PlayerDisconnected(PlayerDisconnectedPayload),

    /// The opponent re-attached during the waiting phase.
    #[serde(rename = "game.player.reconnected")]
    PlayerReconnected(PlayerReconnectedPayload),

    /// Presence change of a friend.
    #[serde(rename = "user.status.changed")]
    StatusChanged(StatusChangedPayload),

    /// Ranked rating change after settlement.
    #[serde(rename = "ranked.mmr.changed")]
    MmrChanged(MmrChangedPayload),

    /// Recoverable error; the session stays open.
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// `auth.connected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConnectedPayload {
    /// Authenticated user.
    pub user_id: UserId,
    /// Session handle for this socket.
    pub session_id: SessionId,
    /// Display name on record.
    pub display_name: String,
    /// Server version.
    pub server_version: String,
}

/// `connection.pong` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    /// Echoed client timestamp.
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Server wall-clock in unix milliseconds.
    pub server_time: u64,
}

/// `connection.reconnected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectedPayload {
    /// Session handle for this socket.
    pub session_id: SessionId,
    /// Live match the session re-attached to, if any.
    #[serde(default)]
    pub match_id: Option<MatchId>,
}

/// `connection.disconnect` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    /// Machine reason: `duplicate_session`, `idle_timeout`, `shutdown`.
    pub reason: String,
}

/// `matchmaking.searching` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchingPayload {
    /// Current queue depth.
    pub players_in_queue: usize,
    /// Rough wait estimate in seconds.
    pub estimated_wait_time: u64,
}

/// `matchmaking.confirm.request` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequestPayload {
    /// Pairing id.
    pub match_id: MatchId,
    /// Who you were paired with.
    pub opponent: PlayerInfo,
    /// Settings the match will use.
    pub settings: MatchSettings,
    /// Seconds to confirm.
    pub deadline_secs: u64,
}

/// `matchmaking.confirm.status` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmStatusPayload {
    /// Pairing id.
    pub match_id: MatchId,
    /// Progress or outcome.
    pub status: ConfirmStatus,
}

/// `matchmaking.cancelled` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingCancelledPayload {
    /// User whose entry was removed.
    pub user_id: UserId,
}

/// Minimal player descriptor used in several payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Player id.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
}

/// Lobby member as shown on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMemberInfo {
    /// Member id.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Whether this member is the host.
    pub is_host: bool,
    /// Whether this member is ready.
    pub is_ready: bool,
}

/// Full lobby snapshot (`lobby.created` and friends).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStatePayload {
    /// Lobby id.
    pub lobby_id: LobbyId,
    /// Join code.
    pub code: String,
    /// Current host.
    pub host_id: UserId,
    /// Capacity.
    pub max_players: usize,
    /// Hidden from listing.
    pub is_private: bool,
    /// Lifecycle.
    pub status: LobbyStatus,
    /// Match settings for the lobby's game.
    pub settings: MatchSettings,
    /// Members in join order.
    pub members: Vec<LobbyMemberInfo>,
}

/// `lobby.player.joined` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayerJoinedPayload {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// New member.
    pub member: LobbyMemberInfo,
    /// Member count after the join.
    pub players: usize,
    /// Full lobby snapshot so the joiner can render the room.
    pub lobby: LobbyStatePayload,
}

/// `lobby.player.ready` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayerReadyPayload {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// Member who toggled.
    pub user_id: UserId,
    /// New ready state.
    pub is_ready: bool,
}

/// `lobby.game.starting` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyGameStartingPayload {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// Match being created.
    pub match_id: MatchId,
    /// Countdown until the engine starts.
    pub starts_in_secs: u64,
}

/// `lobby.player_left` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayerLeftPayload {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// Member who left.
    pub user_id: UserId,
    /// New host after a transfer.
    #[serde(default)]
    pub new_host_id: Option<UserId>,
    /// Whether the lobby closed.
    pub closed: bool,
}

/// `lobby.player.kicked` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayerKickedPayload {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// Member who was removed.
    pub user_id: UserId,
}

/// One row of the public lobby listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyListEntry {
    /// Lobby id.
    pub lobby_id: LobbyId,
    /// Join code.
    pub code: String,
    /// Host's display name.
    pub host_name: String,
    /// Current member count.
    pub players: usize,
    /// Capacity.
    pub max_players: usize,
    /// Match settings.
    pub settings: MatchSettings,
}

/// `lobby.list.data` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyListDataPayload {
    /// Public, joinable lobbies.
    pub lobbies: Vec<LobbyListEntry>,
}

/// Player as included in `game.started`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePlayerInfo {
    /// Player id.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Starting health.
    pub health: i32,
}

/// Snapshot of match progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateInfo {
    /// Current question position.
    pub current_index: usize,
    /// Questions in the match.
    pub total_questions: usize,
    /// Seconds per question.
    #[serde(rename = "timePerQuestionSec")]
    pub time_per_question_secs: u64,
}

/// `game.started` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Both players, A first.
    pub players: Vec<GamePlayerInfo>,
    /// Initial progress snapshot.
    pub game_state: GameStateInfo,
    /// Server wall-clock in unix milliseconds.
    pub server_time: u64,
}

/// A question as sent to clients: no correct index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPublic {
    /// Question id.
    pub id: Uuid,
    /// Position in the match.
    pub index: usize,
    /// Question text.
    pub text: String,
    /// Answer choices.
    pub choices: Vec<String>,
}

impl QuestionPublic {
    /// Redact a bank record for the wire.
    pub fn from_record(index: usize, record: &QuestionRecord) -> Self {
        Self {
            id: record.id,
            index,
            text: record.text.clone(),
            choices: record.choices.clone(),
        }
    }
}

/// `game.questions.all` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameQuestionsPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Redacted question sequence, in play order.
    pub questions: Vec<QuestionPublic>,
}

/// `game.answer.received` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReceivedPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Question answered.
    pub question_index: usize,
    /// Whether the answer was correct.
    pub correct: bool,
    /// Canonical correct index.
    pub correct_answer_index: usize,
    /// Display points awarded.
    pub points: u32,
    /// Your health after damage.
    pub player_health: i32,
    /// Opponent health after damage.
    pub opponent_health: i32,
}

/// `game.opponent.answered` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentAnsweredPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Question answered.
    pub question_index: usize,
    /// Whether the opponent was correct.
    pub correct: bool,
    /// Animation hint.
    pub animation: Animation,
}

/// Health of one player inside a battle update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerHealth {
    /// Player id.
    pub user_id: UserId,
    /// Current health.
    pub health: i32,
}

/// `game.battle.update` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleUpdatePayload {
    /// Match id.
    pub match_id: MatchId,
    /// Healths of both players, A first.
    pub healths: Vec<PlayerHealth>,
}

/// One player's row in a timeout broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutPlayerInfo {
    /// Player id.
    pub user_id: UserId,
    /// Damage taken from the timeout.
    pub took_damage: i32,
    /// Health after the penalty.
    pub health: i32,
}

/// `game.question.timeout` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTimeoutPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Question that timed out.
    pub question_index: usize,
    /// Canonical correct index, revealed on timeout.
    pub correct_answer_index: usize,
    /// Both players with the damage they took.
    pub players: Vec<TimeoutPlayerInfo>,
}

/// Reward bundle credited at settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsInfo {
    /// Display points.
    pub points: u32,
    /// Experience.
    pub xp: u32,
    /// Coins.
    pub coins: u32,
}

/// Per-player rewards row in `game.over`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRewards {
    /// Player id.
    pub user_id: UserId,
    /// Rewards credited.
    pub rewards: RewardsInfo,
}

/// `game.over` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Winner.
    pub winner: Option<UserId>,
    /// Loser.
    pub loser: Option<UserId>,
    /// Why the match ended.
    pub reason: EndReason,
    /// Final healths, A first.
    pub healths: Vec<PlayerHealth>,
    /// Rewards for both players.
    pub rewards: Vec<PlayerRewards>,
    /// Every accepted answer, in order.
    pub game_history: Vec<AnswerEntry>,
}

/// `game.player.disconnected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDisconnectedPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Player whose socket closed.
    pub user_id: UserId,
    /// The remaining player wins by forfeit.
    pub auto_win: bool,
}

/// `game.player.reconnected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReconnectedPayload {
    /// Match id.
    pub match_id: MatchId,
    /// Player who re-attached.
    pub user_id: UserId,
}

/// `user.status.changed` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangedPayload {
    /// User whose status changed.
    pub user_id: UserId,
    /// New status.
    pub status: UserStatus,
}

/// `ranked.mmr.changed` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MmrChangedPayload {
    /// Rated player.
    pub user_id: UserId,
    /// Rating before the match.
    pub old: i32,
    /// Rating after the match.
    pub new: i32,
    /// Signed change.
    pub change: i32,
    /// Tier label before.
    pub old_tier: String,
    /// Tier label after.
    pub new_tier: String,
    /// Crossed a band upward.
    pub promoted: bool,
    /// Crossed a band downward.
    pub demoted: bool,
}

/// Error envelope payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Stable machine code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Build an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes, grouped as in the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Payload did not match the message type.
    InvalidMessage,
    /// Envelope type is not in the catalogue.
    UnknownMessageType,
    /// Envelope was not valid JSON.
    MessageProcessingError,
    /// Request is well-formed but not valid right now.
    InvalidRequest,
    /// Token failed validation.
    InvalidToken,
    /// Token subject has no user row.
    UserNotFound,
    /// Payload user does not match the session's user.
    Unauthorized,
    /// Caller already holds a match, lobby, or queue entry.
    AlreadyInGame,
    /// Target is not a friend.
    NotFriends,
    /// Target is not online.
    UserOffline,
    /// Lobby start requirements not met.
    NotReady,
    /// Match does not exist or expired.
    MatchNotFound,
    /// Match already reached a terminal state.
    MatchFinished,
    /// Caller is not a participant of the match.
    NotInMatch,
    /// No lobby with that code.
    LobbyNotFound,
    /// Lobby is at capacity.
    LobbyFull,
    /// Invite does not exist.
    InviteNotFound,
    /// Request does not exist.
    RequestNotFound,
    /// Could not generate a unique lobby code.
    LobbyCodeGenerationFailed,
    /// Question bank returned nothing for the filters.
    InsufficientQuestions,
    /// Unexpected server-side failure.
    InternalError,
}

// =============================================================================
// DECODING
// =============================================================================

/// Envelope type strings the server accepts.
pub const KNOWN_CLIENT_TYPES: &[&str] = &[
    "auth:connect",
    "connection.ping",
    "connection.reconnect",
    "user.status.update",
    "matchmaking.find",
    "matchmaking.cancel",
    "matchmaking.confirm",
    "lobby.create",
    "lobby.join",
    "lobby.ready",
    "lobby.start",
    "lobby.leave",
    "lobby.kick",
    "lobby.list.sync",
    "game.connect",
    "game.answer.submit",
];

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame was not a JSON envelope at all.
    #[error("malformed envelope: {0}")]
    Malformed(serde_json::Error),

    /// The envelope type is not in the catalogue.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The payload did not validate against the type's schema.
    #[error("invalid payload for {message_type}: {source}")]
    BadPayload {
        /// The envelope type.
        message_type: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Error code surfaced to the client.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::Malformed(_) => ErrorCode::MessageProcessingError,
            DecodeError::UnknownType(_) => ErrorCode::UnknownMessageType,
            DecodeError::BadPayload { .. } => ErrorCode::InvalidMessage,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ClientMessage {
    /// Decode an inbound text frame. Distinguishes a malformed envelope,
    /// an unknown type, and an ill-typed payload.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: RawEnvelope = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

        if !KNOWN_CLIENT_TYPES.contains(&envelope.message_type.as_str()) {
            return Err(DecodeError::UnknownType(envelope.message_type));
        }

        let value = serde_json::json!({
            "type": envelope.message_type,
            "payload": envelope.payload,
        });
        serde_json::from_value(value).map_err(|source| DecodeError::BadPayload {
            message_type: envelope.message_type,
            source,
        })
    }

    /// The sender claimed in the payload. Checked against the session's
    /// authenticated user before dispatch.
    pub fn user_id(&self) -> UserId {
        match self {
            ClientMessage::AuthConnect(p) => p.user_id,
            ClientMessage::Ping(p) => p.user_id,
            ClientMessage::Reconnect(p) => p.user_id,
            ClientMessage::StatusUpdate(p) => p.user_id,
            ClientMessage::FindMatch(p) => p.user_id,
            ClientMessage::CancelMatchmaking(p) => p.user_id,
            ClientMessage::ConfirmMatch(p) => p.user_id,
            ClientMessage::CreateLobby(p) => p.user_id,
            ClientMessage::JoinLobby(p) => p.user_id,
            ClientMessage::LobbyReady(p) => p.user_id,
            ClientMessage::StartLobby(p) => p.user_id,
            ClientMessage::LeaveLobby(p) => p.user_id,
            ClientMessage::KickFromLobby(p) => p.user_id,
            ClientMessage::SyncLobbyList(p) => p.user_id,
            ClientMessage::GameConnect(p) => p.user_id,
            ClientMessage::SubmitAnswer(p) => p.user_id,
        }
    }
}

impl ServerMessage {
    /// Serialize to a JSON envelope.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Shorthand for a recoverable error envelope.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload::new(code, message))
    }
}

/// Server wall-clock in unix milliseconds, as carried by `serverTime`.
pub fn server_time_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
