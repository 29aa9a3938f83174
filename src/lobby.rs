//! Lobby Manager
//!
//! Code-addressed private rooms with host authority. Members join by a
//! 6-character code, toggle ready, and the host starts the match once
//! everyone is ready. Lobbies expire after a TTL; the sweeper closes them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::core::ids::{LobbyId, MatchId, UserId};
use crate::core::timer::schedule;
use crate::game::engine::{self, MatchCommand};
use crate::game::state::{MatchMode, MatchSettings, MatchState};
use crate::network::protocol::{
    ErrorCode, LobbyGameStartingPayload, LobbyListDataPayload, LobbyListEntry, LobbyMemberInfo,
    LobbyPlayerJoinedPayload, LobbyPlayerKickedPayload, LobbyPlayerLeftPayload,
    LobbyPlayerReadyPayload, LobbySettingsPayload, LobbyStatePayload, LobbyStatus, ServerMessage,
    UserStatus,
};
use crate::store::{LobbyRow, MatchRow, MatchRowStatus, Store};

/// Characters a lobby code is drawn from.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lobby code length.
const CODE_LEN: usize = 6;

/// Attempts at generating an unused code before giving up.
const CODE_RETRIES: usize = 10;

/// Lobby operation errors, each with a wire code.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// No lobby with that code or id, or the lobby already ended.
    #[error("lobby not found")]
    NotFound,
    /// Lobby is at capacity.
    #[error("lobby is full")]
    Full,
    /// Caller already holds a match or lobby.
    #[error("already in a game or lobby")]
    AlreadyInGame,
    /// Start requirements not met.
    #[error("not enough ready players")]
    NotReady,
    /// Caller is not the host.
    #[error("host privileges required")]
    NotHost,
    /// Target user is not a member.
    #[error("user is not in this lobby")]
    NotAMember,
    /// Ran out of code generation attempts.
    #[error("could not generate a unique lobby code")]
    CodeGenerationFailed,
}

impl LobbyError {
    /// Wire error code for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            LobbyError::NotFound => ErrorCode::LobbyNotFound,
            LobbyError::Full => ErrorCode::LobbyFull,
            LobbyError::AlreadyInGame => ErrorCode::AlreadyInGame,
            LobbyError::NotReady => ErrorCode::NotReady,
            LobbyError::NotHost => ErrorCode::Unauthorized,
            LobbyError::NotAMember => ErrorCode::InvalidRequest,
            LobbyError::CodeGenerationFailed => ErrorCode::LobbyCodeGenerationFailed,
        }
    }
}

/// One lobby member, in join order inside the lobby.
#[derive(Debug, Clone)]
struct LobbyMember {
    user_id: UserId,
    display_name: String,
    is_host: bool,
    is_ready: bool,
    joined_at: DateTime<Utc>,
}

/// A live lobby.
#[derive(Debug, Clone)]
struct Lobby {
    id: LobbyId,
    code: String,
    host: UserId,
    max_players: usize,
    is_private: bool,
    settings: MatchSettings,
    /// Join order; index 0 is the oldest member.
    members: Vec<LobbyMember>,
    status: LobbyStatus,
    expires_at: DateTime<Utc>,
}

impl Lobby {
    fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id).collect()
    }

    fn snapshot(&self) -> LobbyStatePayload {
        LobbyStatePayload {
            lobby_id: self.id,
            code: self.code.clone(),
            host_id: self.host,
            max_players: self.max_players,
            is_private: self.is_private,
            status: self.status,
            settings: self.settings.clone(),
            members: self
                .members
                .iter()
                .map(|m| LobbyMemberInfo {
                    user_id: m.user_id,
                    display_name: m.display_name.clone(),
                    is_host: m.is_host,
                    is_ready: m.is_ready,
                })
                .collect(),
        }
    }

    fn row(&self) -> LobbyRow {
        LobbyRow {
            id: self.id,
            code: self.code.clone(),
            host: self.host,
            is_private: self.is_private,
            max_players: self.max_players,
            status: match self.status {
                LobbyStatus::Waiting => "waiting",
                LobbyStatus::Starting => "starting",
                LobbyStatus::InGame => "in_game",
                LobbyStatus::Finished => "finished",
            }
            .into(),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    lobbies: BTreeMap<LobbyId, Lobby>,
    by_code: BTreeMap<String, LobbyId>,
}

/// The lobby service.
pub struct LobbyManager {
    ctx: AppContext,
    inner: RwLock<Inner>,
}

impl LobbyManager {
    /// Build the lobby manager over the shared context.
    pub fn new(ctx: AppContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            inner: RwLock::new(Inner::default()),
        })
    }

    /// Handle `lobby.create`.
    pub async fn create(
        &self,
        user_id: UserId,
        max_players: Option<usize>,
        is_private: Option<bool>,
        settings: Option<LobbySettingsPayload>,
    ) -> Result<(), LobbyError> {
        let Some(session) = self.ctx.registry.lookup_by_user(user_id).await else {
            return Ok(());
        };
        if session.current_match.is_some() || session.current_lobby.is_some() {
            return Err(LobbyError::AlreadyInGame);
        }

        let settings = self.resolve_settings(settings);
        let lobby_id = LobbyId::generate();
        let now = Utc::now();

        let lobby = {
            let mut inner = self.inner.write().await;
            let code = generate_code(&inner.by_code)?;

            let lobby = Lobby {
                id: lobby_id,
                code: code.clone(),
                host: user_id,
                // the battle is head-to-head; capacity is clamped to two
                max_players: max_players.unwrap_or(2).clamp(2, 2),
                is_private: is_private.unwrap_or(true),
                settings,
                members: vec![LobbyMember {
                    user_id,
                    display_name: session.display_name.clone(),
                    is_host: true,
                    // host is auto-ready
                    is_ready: true,
                    joined_at: now,
                }],
                status: LobbyStatus::Waiting,
                expires_at: now + chrono::Duration::seconds(self.ctx.config.lobby_ttl().as_secs() as i64),
            };
            inner.by_code.insert(code, lobby_id);
            inner.lobbies.insert(lobby_id, lobby.clone());
            lobby
        };

        if let Err(e) = self.ctx.store.insert_lobby(lobby.row()).await {
            warn!(%lobby_id, error = %e, "lobby row insert failed");
        }
        if let Err(e) = self.ctx.store.add_lobby_member(lobby_id, user_id).await {
            warn!(%lobby_id, error = %e, "lobby member insert failed");
        }

        self.ctx
            .registry
            .set_current_lobby(user_id, Some(lobby_id))
            .await;
        self.ctx
            .registry
            .update_status(user_id, UserStatus::InLobby)
            .await;

        self.ctx
            .router
            .send_to_user(user_id, ServerMessage::LobbyCreated(lobby.snapshot()))
            .await;

        info!(%lobby_id, code = %lobby.code, host = %user_id, "lobby created");
        Ok(())
    }

    fn resolve_settings(&self, partial: Option<LobbySettingsPayload>) -> MatchSettings {
        let partial = partial.unwrap_or(LobbySettingsPayload {
            difficulty: None,
            category: None,
            total_questions: None,
            time_per_question_secs: None,
        });
        MatchSettings {
            mode: MatchMode::Friend,
            difficulty: partial.difficulty.unwrap_or_else(|| "all".into()),
            category: partial.category.unwrap_or_else(|| "all".into()),
            total_questions: partial
                .total_questions
                .unwrap_or(self.ctx.config.total_questions),
            time_per_question_secs: partial
                .time_per_question_secs
                .unwrap_or(self.ctx.config.question_time_secs),
        }
    }

    /// Handle `lobby.join`.
    pub async fn join(&self, user_id: UserId, code: &str) -> Result<(), LobbyError> {
        let Some(session) = self.ctx.registry.lookup_by_user(user_id).await else {
            return Ok(());
        };
        if session.current_match.is_some() || session.current_lobby.is_some() {
            return Err(LobbyError::AlreadyInGame);
        }

        let code = code.trim().to_ascii_uppercase();
        let (lobby_id, snapshot, member_ids, member) = {
            let mut inner = self.inner.write().await;
            let lobby_id = *inner.by_code.get(&code).ok_or(LobbyError::NotFound)?;
            let lobby = inner.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;

            if lobby.status != LobbyStatus::Waiting {
                return Err(LobbyError::NotFound);
            }
            if lobby.members.len() >= lobby.max_players {
                return Err(LobbyError::Full);
            }

            let member = LobbyMember {
                user_id,
                display_name: session.display_name.clone(),
                is_host: false,
                is_ready: false,
                joined_at: Utc::now(),
            };
            lobby.members.push(member.clone());
            (lobby_id, lobby.snapshot(), lobby.member_ids(), member)
        };

        if let Err(e) = self.ctx.store.add_lobby_member(lobby_id, user_id).await {
            warn!(%lobby_id, error = %e, "lobby member insert failed");
        }

        self.ctx
            .registry
            .set_current_lobby(user_id, Some(lobby_id))
            .await;
        self.ctx
            .registry
            .update_status(user_id, UserStatus::InLobby)
            .await;

        let players = member_ids.len();
        self.ctx
            .router
            .broadcast_to_lobby(
                &member_ids,
                ServerMessage::LobbyPlayerJoined(LobbyPlayerJoinedPayload {
                    lobby_id,
                    member: LobbyMemberInfo {
                        user_id: member.user_id,
                        display_name: member.display_name.clone(),
                        is_host: false,
                        is_ready: false,
                    },
                    players,
                    lobby: snapshot,
                }),
            )
            .await;

        Ok(())
    }

    /// Handle `lobby.ready`.
    pub async fn set_ready(
        &self,
        user_id: UserId,
        lobby_id: LobbyId,
        ready: bool,
    ) -> Result<(), LobbyError> {
        let member_ids = {
            let mut inner = self.inner.write().await;
            let lobby = inner.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
            let member = lobby
                .members
                .iter_mut()
                .find(|m| m.user_id == user_id)
                .ok_or(LobbyError::NotAMember)?;
            member.is_ready = ready;
            lobby.member_ids()
        };

        self.ctx
            .router
            .broadcast_to_lobby(
                &member_ids,
                ServerMessage::LobbyPlayerReady(LobbyPlayerReadyPayload {
                    lobby_id,
                    user_id,
                    is_ready: ready,
                }),
            )
            .await;
        Ok(())
    }

    /// Handle `lobby.start`. Host-only; needs at least two members, all
    /// ready.
    pub async fn start(&self, user_id: UserId, lobby_id: LobbyId) -> Result<(), LobbyError> {
        let (lobby, player_a, player_b) = {
            let mut inner = self.inner.write().await;
            let lobby = inner.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;

            if lobby.host != user_id {
                return Err(LobbyError::NotHost);
            }
            if lobby.status != LobbyStatus::Waiting {
                return Err(LobbyError::NotFound);
            }
            if lobby.members.len() < 2 || !lobby.members.iter().all(|m| m.is_ready) {
                return Err(LobbyError::NotReady);
            }

            lobby.status = LobbyStatus::Starting;

            let host = lobby
                .members
                .iter()
                .find(|m| m.user_id == lobby.host)
                .cloned()
                .ok_or(LobbyError::NotAMember)?;
            let guest = lobby
                .members
                .iter()
                .find(|m| m.user_id != lobby.host)
                .cloned()
                .ok_or(LobbyError::NotReady)?;

            (lobby.clone(), host, guest)
        };

        let match_id = MatchId::generate();
        if let Err(e) = self
            .ctx
            .store
            .insert_match(MatchRow {
                id: match_id,
                players: [player_a.user_id, player_b.user_id],
                mode: lobby.settings.mode.as_str().into(),
                difficulty: lobby.settings.difficulty.clone(),
                category: lobby.settings.category.clone(),
                status: MatchRowStatus::Pending,
                winner: None,
                healths: None,
                scores: None,
                question_ids: vec![],
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            })
            .await
        {
            warn!(%match_id, error = %e, "match row insert failed");
        }

        let state = MatchState::new(
            match_id,
            lobby.settings.clone(),
            (player_a.user_id, player_a.display_name.clone()),
            (player_b.user_id, player_b.display_name.clone()),
        );
        let handle = engine::spawn_match(&self.ctx, state).await;

        // lobby seat becomes a match seat
        for player in [player_a.user_id, player_b.user_id] {
            self.ctx.registry.set_current_lobby(player, None).await;
            self.ctx
                .registry
                .set_current_match(player, Some(match_id))
                .await;
            self.ctx
                .registry
                .update_status(player, UserStatus::InGame)
                .await;
        }

        let updated_row = {
            let mut inner = self.inner.write().await;
            inner.lobbies.get_mut(&lobby_id).map(|lobby| {
                lobby.status = LobbyStatus::InGame;
                lobby.row()
            })
        };
        if let Some(row) = updated_row {
            if let Err(e) = self.ctx.store.update_lobby(row).await {
                warn!(%lobby_id, error = %e, "lobby row update failed");
            }
        }

        let starts_in = self.ctx.config.start_delay_secs;
        self.ctx
            .router
            .broadcast_to_lobby(
                &lobby.member_ids(),
                ServerMessage::LobbyGameStarting(LobbyGameStartingPayload {
                    lobby_id,
                    match_id,
                    starts_in_secs: starts_in,
                }),
            )
            .await;

        schedule(std::time::Duration::from_secs(starts_in), async move {
            handle.send(MatchCommand::Start).await;
        });

        info!(%lobby_id, %match_id, "lobby match starting");
        Ok(())
    }

    /// Handle `lobby.leave`, and the disconnect cleanup path.
    pub async fn leave(&self, user_id: UserId, lobby_id: LobbyId) -> Result<(), LobbyError> {
        let outcome = {
            let mut inner = self.inner.write().await;
            let lobby = inner.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;

            let index = lobby
                .members
                .iter()
                .position(|m| m.user_id == user_id)
                .ok_or(LobbyError::NotAMember)?;
            lobby.members.remove(index);

            if lobby.members.is_empty() {
                let lobby = inner.lobbies.remove(&lobby_id);
                if let Some(lobby) = &lobby {
                    inner.by_code.remove(&lobby.code);
                }
                (None, Vec::new(), true)
            } else {
                let mut new_host = None;
                if lobby.host == user_id {
                    // host transfer to the oldest remaining member
                    let next = &mut lobby.members[0];
                    next.is_host = true;
                    next.is_ready = true;
                    lobby.host = next.user_id;
                    new_host = Some(next.user_id);
                }
                (new_host, lobby.member_ids(), false)
            }
        };
        let (new_host, member_ids, closed) = outcome;

        if let Err(e) = self.ctx.store.remove_lobby_member(lobby_id, user_id).await {
            warn!(%lobby_id, error = %e, "lobby member delete failed");
        }
        if closed {
            if let Err(e) = self.ctx.store.delete_lobby(lobby_id).await {
                warn!(%lobby_id, error = %e, "lobby row delete failed");
            }
        }

        self.ctx.registry.set_current_lobby(user_id, None).await;
        self.ctx
            .registry
            .update_status(user_id, UserStatus::Online)
            .await;

        let notice = ServerMessage::LobbyPlayerLeft(LobbyPlayerLeftPayload {
            lobby_id,
            user_id,
            new_host_id: new_host,
            closed,
        });
        if member_ids.is_empty() {
            self.ctx.router.send_to_user(user_id, notice).await;
        } else {
            self.ctx.router.broadcast_to_lobby(&member_ids, notice).await;
        }

        Ok(())
    }

    /// Handle `lobby.kick`. Host-only.
    pub async fn kick(
        &self,
        user_id: UserId,
        lobby_id: LobbyId,
        target: UserId,
    ) -> Result<(), LobbyError> {
        {
            let inner = self.inner.read().await;
            let lobby = inner.lobbies.get(&lobby_id).ok_or(LobbyError::NotFound)?;
            if lobby.host != user_id {
                return Err(LobbyError::NotHost);
            }
            if !lobby.members.iter().any(|m| m.user_id == target) {
                return Err(LobbyError::NotAMember);
            }
        }

        self.ctx
            .router
            .send_to_user(
                target,
                ServerMessage::LobbyPlayerKicked(LobbyPlayerKickedPayload {
                    lobby_id,
                    user_id: target,
                }),
            )
            .await;

        self.leave(target, lobby_id).await
    }

    /// Handle `lobby.list.sync`: public, joinable lobbies.
    pub async fn list(&self, user_id: UserId) {
        let entries: Vec<LobbyListEntry> = {
            let inner = self.inner.read().await;
            inner
                .lobbies
                .values()
                .filter(|l| !l.is_private && l.status == LobbyStatus::Waiting)
                .map(|l| LobbyListEntry {
                    lobby_id: l.id,
                    code: l.code.clone(),
                    host_name: l
                        .members
                        .iter()
                        .find(|m| m.is_host)
                        .map(|m| m.display_name.clone())
                        .unwrap_or_default(),
                    players: l.members.len(),
                    max_players: l.max_players,
                    settings: l.settings.clone(),
                })
                .collect()
        };

        self.ctx
            .router
            .send_to_user(
                user_id,
                ServerMessage::LobbyListData(LobbyListDataPayload { lobbies: entries }),
            )
            .await;
    }

    /// Close lobbies past their expiry.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<Lobby> = {
            let mut inner = self.inner.write().await;
            let ids: Vec<LobbyId> = inner
                .lobbies
                .values()
                .filter(|l| l.expires_at <= now)
                .map(|l| l.id)
                .collect();
            ids.iter()
                .filter_map(|id| {
                    let lobby = inner.lobbies.remove(id)?;
                    inner.by_code.remove(&lobby.code);
                    Some(lobby)
                })
                .collect()
        };

        for lobby in expired {
            info!(lobby_id = %lobby.id, code = %lobby.code, "lobby expired");

            // members of a lobby that went in_game already had their
            // session refs moved to the match; only waiting lobbies still
            // own their members
            if lobby.status == LobbyStatus::Waiting {
                for member in &lobby.members {
                    self.ctx
                        .registry
                        .set_current_lobby(member.user_id, None)
                        .await;
                    self.ctx
                        .registry
                        .update_status(member.user_id, UserStatus::Online)
                        .await;
                }
                self.ctx
                    .router
                    .broadcast_to_lobby(
                        &lobby.member_ids(),
                        ServerMessage::LobbyPlayerLeft(LobbyPlayerLeftPayload {
                            lobby_id: lobby.id,
                            user_id: lobby.host,
                            new_host_id: None,
                            closed: true,
                        }),
                    )
                    .await;
            }

            if let Err(e) = self.ctx.store.delete_lobby(lobby.id).await {
                warn!(lobby_id = %lobby.id, error = %e, "lobby row delete failed");
            }
        }
    }

    /// Live lobby count.
    pub async fn count(&self) -> usize {
        self.inner.read().await.lobbies.len()
    }
}

/// Generate a code not currently in use, with a bounded number of tries.
fn generate_code(in_use: &BTreeMap<String, LobbyId>) -> Result<String, LobbyError> {
    let mut rng = rand::thread_rng();
    for _ in 0..CODE_RETRIES {
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        if !in_use.contains_key(&code) {
            return Ok(code);
        }
    }
    Err(LobbyError::CodeGenerationFailed)
}
