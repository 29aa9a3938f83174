//! WebSocket Game Server
//!
//! Async WebSocket server for the quiz battle. Owns the accept loop, the
//! per-socket reader and single-writer tasks, message dispatch into the
//! matchmaker / lobby manager / match engine, and the periodic sweepers
//! (idle sessions, expired lobbies, stale queue entries).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::context::AppContext;
use crate::core::ids::{SessionId, UserId};
use crate::game::engine::{MatchCommand, MatchHandle};
use crate::lobby::LobbyManager;
use crate::matchmaking::Matchmaker;
use crate::network::auth::{validate_token, AuthConfig};
use crate::network::protocol::{
    server_time_ms, AuthConnectPayload, AuthConnectedPayload, ClientMessage, DisconnectPayload,
    ErrorCode, ErrorPayload, PongPayload, ServerMessage, StatusChangedPayload, UserStatus,
};
use crate::network::session::Session;
use crate::store::Store;

/// Disconnect reason sent to an evicted duplicate session.
pub const REASON_DUPLICATE_SESSION: &str = "duplicate_session";
/// Disconnect reason sent by the idle sweeper.
pub const REASON_IDLE_TIMEOUT: &str = "idle_timeout";
/// Disconnect reason sent at shutdown.
pub const REASON_SHUTDOWN: &str = "shutdown";

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
struct ConnState {
    ctx: AppContext,
    auth: AuthConfig,
    matchmaker: Arc<Matchmaker>,
    lobbies: Arc<LobbyManager>,
}

/// The game server.
pub struct GameServer {
    state: ConnState,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server over a store.
    pub fn new(config: ServerConfig, auth: AuthConfig, store: Arc<dyn Store>) -> Self {
        let ctx = AppContext::new(config, store);
        let matchmaker = Matchmaker::new(ctx.clone());
        let lobbies = LobbyManager::new(ctx.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: ConnState {
                ctx,
                auth,
                matchmaker,
                lobbies,
            },
            shutdown_tx,
        }
    }

    /// Shared context (registry, store, match table).
    pub fn context(&self) -> &AppContext {
        &self.state.ctx
    }

    /// Run the server until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.state.ctx.config.bind_addr).await?;
        info!(
            addr = %self.state.ctx.config.bind_addr,
            path = %self.state.ctx.config.endpoint_path,
            "quiz battle server listening"
        );
        self.serve(listener).await
    }

    /// Run the accept loop on an existing listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let sweeper_state = self.state.clone();
        let mut sweeper_shutdown = self.shutdown_tx.subscribe();
        let sweeper = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                sweeper_state.ctx.config.sweep_interval_secs,
            ));
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_sweep(&sweeper_state).await,
                    _ = sweeper_shutdown.recv() => break,
                }
            }
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connections = self.state.ctx.registry.count().await;
                            if connections >= self.state.ctx.config.max_connections {
                                warn!(%addr, "connection limit reached, rejecting");
                                continue;
                            }
                            let state = self.state.clone();
                            let shutdown = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(state, stream, addr, shutdown).await;
                            });
                        }
                        Err(e) => error!(error = %e, "accept error"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        sweeper.abort();
        Ok(())
    }

    /// Signal shutdown to the accept loop and all connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live session count.
    pub async fn session_count(&self) -> usize {
        self.state.ctx.registry.count().await
    }

    /// Live match count.
    pub async fn match_count(&self) -> usize {
        self.state.ctx.matches.count().await
    }
}

/// One sweep of the periodic maintenance work: idle sessions are
/// disconnected through the same cleanup path as a socket close, expired
/// lobbies close, and long-waiting queue entries get a status refresh.
async fn run_sweep(state: &ConnState) {
    let idle_timeout = Duration::from_secs(state.ctx.config.idle_timeout_secs);
    for session in state.ctx.registry.idle_sessions(idle_timeout).await {
        info!(user_id = %session.user_id, "disconnecting idle session");
        let _ = session
            .outbound
            .send(ServerMessage::Disconnect(DisconnectPayload {
                reason: REASON_IDLE_TIMEOUT.into(),
            }))
            .await;
        disconnect_cleanup(state, session.session_id).await;
    }

    state.lobbies.sweep_expired().await;
    state.matchmaker.sweep_stale().await;
}

fn upgrade_callback(
    endpoint_path: String,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
    move |request: &Request, response: Response| {
        if request.uri().path() == endpoint_path {
            Ok(response)
        } else {
            debug!(path = %request.uri().path(), "rejecting upgrade on unknown path");
            let mut rejection = ErrorResponse::new(Some("not found".into()));
            *rejection.status_mut() =
                tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
            Err(rejection)
        }
    }
}

/// Handle one socket from upgrade to cleanup.
async fn handle_connection(
    state: ConnState,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let ws_config = WebSocketConfig {
        max_message_size: Some(state.ctx.config.max_message_bytes),
        ..Default::default()
    };
    let callback = upgrade_callback(state.ctx.config.endpoint_path.clone());
    let ws_stream = match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    debug!(%addr, "connection established");

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMessage>(64);
    let writer = tokio::spawn(run_writer(ws_sender, outbound_rx));

    // ---- auth phase: the first frame must be auth:connect ----
    let auth_deadline = Duration::from_secs(state.ctx.config.idle_timeout_secs);
    let mut authed: Option<(SessionId, UserId)> = None;

    while authed.is_none() {
        let frame = tokio::select! {
            frame = tokio::time::timeout(auth_deadline, ws_receiver.next()) => {
                match frame {
                    Ok(frame) => frame,
                    Err(_) => {
                        debug!(%addr, "auth deadline elapsed");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => break,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ClientMessage::decode(&text) {
                Ok(ClientMessage::AuthConnect(payload)) => {
                    match authenticate(&state, payload, &outbound_tx).await {
                        Ok(ids) => authed = Some(ids),
                        Err(fatal) => {
                            if fatal {
                                break;
                            }
                        }
                    }
                }
                Ok(_) => {
                    let _ = outbound_tx
                        .send(ServerMessage::error(
                            ErrorCode::Unauthorized,
                            "authenticate first",
                        ))
                        .await;
                }
                Err(e) => {
                    let _ = outbound_tx
                        .send(ServerMessage::error(e.error_code(), e.to_string()))
                        .await;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(%addr, error = %e, "websocket error before auth");
                break;
            }
            _ => {}
        }
    }

    let Some((session_id, user_id)) = authed else {
        // let the writer flush any auth error before the socket drops
        drop(outbound_tx);
        let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
        return;
    };

    // ---- main loop ----
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match ClientMessage::decode(&text) {
                            Ok(message) => {
                                dispatch(&state, session_id, user_id, message).await;
                            }
                            Err(e) => {
                                // the session stays open on decode failures
                                let _ = outbound_tx
                                    .send(ServerMessage::error(e.error_code(), e.to_string()))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%addr, "client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(%addr, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
            _ = shutdown.recv() => {
                let _ = outbound_tx
                    .send(ServerMessage::Disconnect(DisconnectPayload {
                        reason: REASON_SHUTDOWN.into(),
                    }))
                    .await;
                break;
            }
        }
    }

    disconnect_cleanup(&state, session_id).await;
    // let the writer drain queued messages before the task is dropped
    drop(outbound_tx);
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    debug!(%addr, "connection cleaned up");
}

/// Writer task: the single owner of the socket's sink. All outbound bytes
/// flow through here, which gives per-client ordering. A `Disconnect`
/// message is sent and then the socket is closed.
async fn run_writer(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, ServerMessage::Disconnect(_));
        match message.encode() {
            Ok(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "failed to serialize outbound message");
                continue;
            }
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Validate the token, admit the session, and evict any previous session
/// of the same user. Returns `Err(true)` for fatal failures that close the
/// socket, `Err(false)` for recoverable ones.
async fn authenticate(
    state: &ConnState,
    payload: AuthConnectPayload,
    outbound: &mpsc::Sender<ServerMessage>,
) -> Result<(SessionId, UserId), bool> {
    let claims = match validate_token(&payload.token, &state.auth) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "token validation failed");
            let _ = outbound
                .send(ServerMessage::AuthError(ErrorPayload::new(
                    ErrorCode::InvalidToken,
                    e.to_string(),
                )))
                .await;
            return Err(true);
        }
    };

    let user_id = claims.user_id();
    if payload.user_id != user_id {
        let _ = outbound
            .send(ServerMessage::AuthError(ErrorPayload::new(
                ErrorCode::Unauthorized,
                "user id does not match token subject",
            )))
            .await;
        return Err(true);
    }

    // store failure during authentication is fatal for the socket
    let record = match state.ctx.store.find_user(user_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            let _ = outbound
                .send(ServerMessage::AuthError(ErrorPayload::new(
                    ErrorCode::UserNotFound,
                    "no account for this user",
                )))
                .await;
            return Err(true);
        }
        Err(e) => {
            error!(error = %e, "user lookup failed during auth");
            let _ = outbound
                .send(ServerMessage::AuthError(ErrorPayload::new(
                    ErrorCode::InternalError,
                    "authentication unavailable",
                )))
                .await;
            return Err(true);
        }
    };

    let session_id = SessionId::generate();
    let mut session = Session::new(
        session_id,
        user_id,
        record.display_name.clone(),
        outbound.clone(),
    );

    // a live match survives a re-login; re-attaching the new socket keeps
    // the forfeit-on-close semantics pointed at the right session
    if let Some(handle) = state.ctx.matches.find_by_user(user_id).await {
        if !handle.is_finished() {
            session.current_match = Some(handle.match_id);
            session.status = UserStatus::InGame;
        }
    }

    // the evicted socket hears about it before the new one is acknowledged
    if let Some(evicted) = state.ctx.registry.register(session).await {
        info!(%user_id, "evicting duplicate session");
        let _ = evicted
            .outbound
            .send(ServerMessage::Disconnect(DisconnectPayload {
                reason: REASON_DUPLICATE_SESSION.into(),
            }))
            .await;
    }

    let _ = outbound
        .send(ServerMessage::AuthConnected(AuthConnectedPayload {
            user_id,
            session_id,
            display_name: record.display_name,
            server_version: state.ctx.config.version.clone(),
        }))
        .await;

    info!(
        %user_id,
        %session_id,
        provider_name = claims.provider_name(),
        "session authenticated"
    );
    Ok((session_id, user_id))
}

/// Dispatch one authenticated message to its handler. Never panics;
/// failures come back as error envelopes.
async fn dispatch(
    state: &ConnState,
    session_id: SessionId,
    user_id: UserId,
    message: ClientMessage,
) {
    // every payload carries the sender's claimed id
    if message.user_id() != user_id {
        state
            .ctx
            .router
            .send_to_session(
                session_id,
                ServerMessage::error(ErrorCode::Unauthorized, "user id mismatch"),
            )
            .await;
        return;
    }

    match message {
        ClientMessage::AuthConnect(_) => {
            state
                .ctx
                .router
                .send_to_session(
                    session_id,
                    ServerMessage::error(ErrorCode::InvalidRequest, "already authenticated"),
                )
                .await;
        }

        ClientMessage::Ping(payload) => {
            state.ctx.registry.touch_ping(session_id).await;
            state
                .ctx
                .router
                .send_to_session(
                    session_id,
                    ServerMessage::Pong(PongPayload {
                        timestamp: payload.timestamp,
                        server_time: server_time_ms(),
                    }),
                )
                .await;
        }

        ClientMessage::Reconnect(payload) => {
            let handle = match payload.match_id {
                Some(match_id) => state.ctx.matches.get(match_id).await,
                None => state.ctx.matches.find_by_user(user_id).await,
            };
            attach_to_match(state, session_id, user_id, handle).await;
        }

        ClientMessage::GameConnect(payload) => {
            let handle = state.ctx.matches.get(payload.match_id).await;
            attach_to_match(state, session_id, user_id, handle).await;
        }

        ClientMessage::StatusUpdate(payload) => {
            if !matches!(payload.status, UserStatus::Online | UserStatus::Away) {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(
                            ErrorCode::InvalidRequest,
                            "only online and away can be set",
                        ),
                    )
                    .await;
                return;
            }
            state.ctx.registry.update_status(user_id, payload.status).await;
            state
                .ctx
                .router
                .broadcast_to_friends(
                    user_id,
                    ServerMessage::StatusChanged(StatusChangedPayload {
                        user_id,
                        status: payload.status,
                    }),
                )
                .await;
        }

        ClientMessage::FindMatch(payload) => {
            if let Err(e) = state
                .matchmaker
                .find(user_id, payload.mode, payload.difficulty, payload.category)
                .await
            {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::CancelMatchmaking(_) => {
            state.matchmaker.cancel(user_id).await;
        }

        ClientMessage::ConfirmMatch(payload) => {
            if let Err(e) = state
                .matchmaker
                .confirm(user_id, payload.match_id, payload.confirmed)
                .await
            {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::CreateLobby(payload) => {
            if let Err(e) = state
                .lobbies
                .create(
                    user_id,
                    payload.max_players,
                    payload.is_private,
                    payload.settings,
                )
                .await
            {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::JoinLobby(payload) => {
            if let Err(e) = state.lobbies.join(user_id, &payload.code).await {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::LobbyReady(payload) => {
            if let Err(e) = state
                .lobbies
                .set_ready(user_id, payload.lobby_id, payload.ready)
                .await
            {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::StartLobby(payload) => {
            if let Err(e) = state.lobbies.start(user_id, payload.lobby_id).await {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::LeaveLobby(payload) => {
            if let Err(e) = state.lobbies.leave(user_id, payload.lobby_id).await {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::KickFromLobby(payload) => {
            if let Err(e) = state
                .lobbies
                .kick(user_id, payload.lobby_id, payload.target_user_id)
                .await
            {
                state
                    .ctx
                    .router
                    .send_to_session(
                        session_id,
                        ServerMessage::error(e.error_code(), e.to_string()),
                    )
                    .await;
            }
        }

        ClientMessage::SyncLobbyList(_) => {
            state.lobbies.list(user_id).await;
        }

        ClientMessage::SubmitAnswer(payload) => {
            match state.ctx.matches.get(payload.match_id).await {
                Some(handle) if handle.is_finished() => {
                    state
                        .ctx
                        .router
                        .send_to_session(
                            session_id,
                            ServerMessage::error(
                                ErrorCode::MatchFinished,
                                "match already finished",
                            ),
                        )
                        .await;
                }
                Some(handle) => {
                    handle
                        .send(MatchCommand::SubmitAnswer {
                            user_id,
                            question_index: payload.question_index,
                            chosen_index: payload.chosen_index,
                            answer_time_ms: payload.answer_time_ms,
                        })
                        .await;
                }
                None => {
                    state
                        .ctx
                        .router
                        .send_to_session(
                            session_id,
                            ServerMessage::error(ErrorCode::MatchNotFound, "no such match"),
                        )
                        .await;
                }
            }
        }
    }
}

/// Shared re-attach path for `connection.reconnect` and `game.connect`.
async fn attach_to_match(
    state: &ConnState,
    session_id: SessionId,
    user_id: UserId,
    handle: Option<MatchHandle>,
) {
    match handle {
        Some(handle) if handle.is_finished() => {
            state
                .ctx
                .router
                .send_to_session(
                    session_id,
                    ServerMessage::error(ErrorCode::MatchFinished, "match already finished"),
                )
                .await;
        }
        Some(handle) => {
            handle.send(MatchCommand::Attach { user_id }).await;
        }
        None => {
            state
                .ctx
                .router
                .send_to_session(
                    session_id,
                    ServerMessage::error(ErrorCode::MatchNotFound, "no live match"),
                )
                .await;
        }
    }
}

/// Socket-close cleanup: deregister, drop queue entries and pending
/// pairings, leave the lobby, and forfeit a live match. A session that was
/// already evicted by a duplicate login deregisters to nothing and skips
/// all of it.
async fn disconnect_cleanup(state: &ConnState, session_id: SessionId) {
    let Some(session) = state.ctx.registry.deregister(session_id).await else {
        return;
    };

    state.matchmaker.remove_user(session.user_id).await;

    if let Some(lobby_id) = session.current_lobby {
        if let Err(e) = state.lobbies.leave(session.user_id, lobby_id).await {
            debug!(user_id = %session.user_id, error = %e, "lobby cleanup on disconnect");
        }
    }

    if let Some(match_id) = session.current_match {
        if let Some(handle) = state.ctx.matches.get(match_id).await {
            if !handle.is_finished() {
                handle
                    .send(MatchCommand::Forfeit {
                        user_id: session.user_id,
                    })
                    .await;
            }
        }
    }

    info!(user_id = %session.user_id, %session_id, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::auth::TokenClaims;
    use crate::store::MemoryStore;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const TEST_SECRET: &str = "server-suite-hs256-secret-0123456789";

    fn test_server(config: ServerConfig) -> (GameServer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthConfig {
            secret: Some(TEST_SECRET.into()),
            ..Default::default()
        };
        (GameServer::new(config, auth, store.clone()), store)
    }

    fn token_for(sub: &str) -> (UserId, String) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = TokenClaims {
            sub: sub.into(),
            exp: now + 3600,
            iat: now,
            iss: None,
            aud: None,
            name: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();
        (claims.user_id(), token)
    }

    #[tokio::test]
    async fn test_server_creation() {
        let (server, _store) = test_server(ServerConfig::default());
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.match_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, _store) = test_server(ServerConfig::default());
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_authenticate_unknown_user_rejected() {
        let (server, _store) = test_server(ServerConfig::default());
        let (user_id, token) = token_for("ghost");
        let (tx, mut rx) = mpsc::channel(8);

        let result = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx,
        )
        .await;
        assert!(result.is_err());

        match rx.recv().await.unwrap() {
            ServerMessage::AuthError(p) => assert_eq!(p.code, ErrorCode::UserNotFound),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_authenticate_token_user_mismatch() {
        let (server, store) = test_server(ServerConfig::default());
        let (_user_id, token) = token_for("alice");
        let impostor = UserId::generate();
        store.seed_user(impostor, "impostor").await;

        let (tx, mut rx) = mpsc::channel(8);
        let result = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id: impostor,
                token,
                client_version: None,
            },
            &tx,
        )
        .await;
        assert!(result.is_err());
        match rx.recv().await.unwrap() {
            ServerMessage::AuthError(p) => assert_eq!(p.code, ErrorCode::Unauthorized),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_authenticate_display_name_comes_from_directory() {
        // the provider's name claim is diagnostics only; what clients see
        // is whatever the user directory has on record
        let (server, store) = test_server(ServerConfig::default());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = TokenClaims {
            sub: "alice".into(),
            exp: now + 3600,
            iat: now,
            iss: None,
            aud: None,
            name: Some("Provider Alice".into()),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();
        let user_id = claims.user_id();
        store.seed_user(user_id, "Quiz Alice").await;

        let (tx, mut rx) = mpsc::channel(8);
        authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx,
        )
        .await
        .unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::AuthConnected(p) => {
                assert_eq!(p.display_name, "Quiz Alice");
                assert_eq!(p.user_id, user_id);
            }
            other => panic!("expected auth.connected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_login_eviction_order() {
        // the old socket hears the disconnect before the new one is
        // acknowledged, and exactly one session remains
        let (server, store) = test_server(ServerConfig::default());
        let (user_id, token) = token_for("alice");
        store.seed_user(user_id, "alice").await;

        let (tx1, mut rx1) = mpsc::channel(8);
        let first = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token: token.clone(),
                client_version: None,
            },
            &tx1,
        )
        .await
        .unwrap();
        match rx1.recv().await.unwrap() {
            ServerMessage::AuthConnected(p) => assert_eq!(p.user_id, user_id),
            other => panic!("expected auth.connected, got {other:?}"),
        }

        let (tx2, mut rx2) = mpsc::channel(8);
        let second = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx2,
        )
        .await
        .unwrap();
        assert_ne!(first.0, second.0);

        // old socket: duplicate_session disconnect
        match rx1.recv().await.unwrap() {
            ServerMessage::Disconnect(p) => assert_eq!(p.reason, REASON_DUPLICATE_SESSION),
            other => panic!("expected disconnect, got {other:?}"),
        }
        // new socket: auth.connected
        match rx2.recv().await.unwrap() {
            ServerMessage::AuthConnected(p) => assert_eq!(p.session_id, second.0),
            other => panic!("expected auth.connected, got {other:?}"),
        }

        assert_eq!(server.session_count().await, 1);

        // the evicted reader's cleanup is a no-op for the new session
        disconnect_cleanup(&server.state, first.0).await;
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_user_id_mismatch() {
        let (server, store) = test_server(ServerConfig::default());
        let (user_id, token) = token_for("alice");
        store.seed_user(user_id, "alice").await;

        let (tx, mut rx) = mpsc::channel(8);
        let (session_id, _) = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx,
        )
        .await
        .unwrap();
        let _ = rx.recv().await; // auth.connected

        dispatch(
            &server.state,
            session_id,
            user_id,
            ClientMessage::CancelMatchmaking(crate::network::protocol::CancelMatchmakingPayload {
                user_id: UserId::generate(),
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            ServerMessage::Error(p) => assert_eq!(p.code, ErrorCode::Unauthorized),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_ping_pong() {
        let (server, store) = test_server(ServerConfig::default());
        let (user_id, token) = token_for("alice");
        store.seed_user(user_id, "alice").await;

        let (tx, mut rx) = mpsc::channel(8);
        let (session_id, _) = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx,
        )
        .await
        .unwrap();
        let _ = rx.recv().await;

        dispatch(
            &server.state,
            session_id,
            user_id,
            ClientMessage::Ping(crate::network::protocol::PingPayload {
                user_id,
                timestamp: Some(42),
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            ServerMessage::Pong(p) => {
                assert_eq!(p.timestamp, Some(42));
                assert!(p.server_time > 0);
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_answer_for_unknown_match() {
        let (server, store) = test_server(ServerConfig::default());
        let (user_id, token) = token_for("alice");
        store.seed_user(user_id, "alice").await;

        let (tx, mut rx) = mpsc::channel(8);
        let (session_id, _) = authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx,
        )
        .await
        .unwrap();
        let _ = rx.recv().await;

        dispatch(
            &server.state,
            session_id,
            user_id,
            ClientMessage::SubmitAnswer(crate::network::protocol::SubmitAnswerPayload {
                user_id,
                match_id: crate::core::ids::MatchId::generate(),
                question_id: None,
                question_index: 0,
                chosen_index: 0,
                answer_time_ms: 1000,
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            ServerMessage::Error(p) => assert_eq!(p.code, ErrorCode::MatchNotFound),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_sweep_disconnects() {
        let config = ServerConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        let (server, store) = test_server(config);
        let (user_id, token) = token_for("alice");
        store.seed_user(user_id, "alice").await;

        let (tx, mut rx) = mpsc::channel(8);
        authenticate(
            &server.state,
            AuthConnectPayload {
                user_id,
                token,
                client_version: None,
            },
            &tx,
        )
        .await
        .unwrap();
        let _ = rx.recv().await;
        assert_eq!(server.session_count().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        run_sweep(&server.state).await;

        assert_eq!(server.session_count().await, 0);
        match rx.recv().await.unwrap() {
            ServerMessage::Disconnect(p) => assert_eq!(p.reason, REASON_IDLE_TIMEOUT),
            other => panic!("expected disconnect, got {other:?}"),
        }
    }
}
