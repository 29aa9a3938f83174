//! Match Engine
//!
//! One actor task per match, consuming a command channel. The actor is the
//! sole writer of its [`MatchState`]; handlers, timers, and the disconnect
//! path all talk to it through [`MatchCommand`]s, which serialises answer
//! evaluation, deadline handling, and the terminal transition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::core::ids::{MatchId, UserId};
use crate::core::timer::{schedule, TimerHandle};
use crate::game::settlement;
use crate::game::state::{
    AnswerReject, EndReason, MatchState, MatchStatus,
};
use crate::network::protocol::{
    Animation, AnswerReceivedPayload, BattleUpdatePayload, ErrorCode, GamePlayerInfo,
    GameQuestionsPayload, GameStartedPayload, GameStateInfo, OpponentAnsweredPayload,
    PlayerDisconnectedPayload, PlayerHealth, PlayerReconnectedPayload, QuestionPublic,
    QuestionTimeoutPayload, ReconnectedPayload, ServerMessage, UserStatus,
    server_time_ms,
};
use crate::store::{AnswerRow, MatchRowStatus, MatchRowUpdate, Store};

/// Commands consumed by a match actor.
#[derive(Debug)]
pub enum MatchCommand {
    /// Begin play: load questions, broadcast the opening messages, arm the
    /// first deadline.
    Start,
    /// Re-attach a player's (new) socket during the waiting phase.
    Attach {
        /// Player re-attaching.
        user_id: UserId,
    },
    /// A player submitted an answer.
    SubmitAnswer {
        /// Answering player.
        user_id: UserId,
        /// Question position targeted.
        question_index: usize,
        /// Chosen choice.
        chosen_index: usize,
        /// Client-reported answer time.
        answer_time_ms: u64,
    },
    /// The deadline timer for a question fired.
    QuestionDeadline {
        /// Question the timer was armed for.
        question_index: usize,
    },
    /// The inter-question delay elapsed.
    NextQuestion,
    /// A player's socket closed; they lose by forfeit.
    Forfeit {
        /// Disconnecting player.
        user_id: UserId,
    },
    /// Abort a match that never started (confirmation declined/expired).
    Cancel,
    /// Final command; the actor exits.
    Shutdown,
}

/// Shared handle to a live match actor.
#[derive(Clone)]
pub struct MatchHandle {
    /// Match id.
    pub match_id: MatchId,
    /// Both players, A first.
    pub players: [UserId; 2],
    /// Command channel into the actor.
    pub commands: mpsc::Sender<MatchCommand>,
    /// Set once the match reaches its terminal state.
    pub finished: Arc<AtomicBool>,
}

impl MatchHandle {
    /// Best-effort command send; a closed actor just drops it.
    pub async fn send(&self, command: MatchCommand) {
        if self.commands.send(command).await.is_err() {
            debug!(match_id = %self.match_id, "command for closed match actor dropped");
        }
    }

    /// Whether the match already reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Directory of live match actors.
#[derive(Default)]
pub struct MatchTable {
    inner: RwLock<BTreeMap<MatchId, MatchHandle>>,
}

impl MatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle.
    pub async fn insert(&self, handle: MatchHandle) {
        self.inner.write().await.insert(handle.match_id, handle);
    }

    /// Handle by match id.
    pub async fn get(&self, match_id: MatchId) -> Option<MatchHandle> {
        self.inner.read().await.get(&match_id).cloned()
    }

    /// Handle of the live match a user participates in.
    pub async fn find_by_user(&self, user_id: UserId) -> Option<MatchHandle> {
        self.inner
            .read()
            .await
            .values()
            .find(|h| h.players.contains(&user_id))
            .cloned()
    }

    /// Drop a handle.
    pub async fn remove(&self, match_id: MatchId) {
        self.inner.write().await.remove(&match_id);
    }

    /// Live match count.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Spawn the actor for a freshly-created match and register its handle.
///
/// The match starts in `Waiting`; nothing happens until a `Start` (or
/// `Cancel`) command arrives.
pub async fn spawn_match(ctx: &AppContext, state: MatchState) -> MatchHandle {
    let (tx, rx) = mpsc::channel(64);
    let handle = MatchHandle {
        match_id: state.match_id,
        players: [state.players()[0].user_id, state.players()[1].user_id],
        commands: tx.clone(),
        finished: Arc::new(AtomicBool::new(false)),
    };
    ctx.matches.insert(handle.clone()).await;

    let actor = MatchActor {
        ctx: ctx.clone(),
        state,
        self_tx: tx,
        finished: handle.finished.clone(),
        question_timer: None,
        advance_timer: None,
    };
    tokio::spawn(actor.run(rx));

    handle
}

struct MatchActor {
    ctx: AppContext,
    state: MatchState,
    self_tx: mpsc::Sender<MatchCommand>,
    finished: Arc<AtomicBool>,
    question_timer: Option<TimerHandle>,
    advance_timer: Option<TimerHandle>,
}

impl MatchActor {
    async fn run(mut self, mut rx: mpsc::Receiver<MatchCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                MatchCommand::Start => self.handle_start().await,
                MatchCommand::Attach { user_id } => self.handle_attach(user_id).await,
                MatchCommand::SubmitAnswer {
                    user_id,
                    question_index,
                    chosen_index,
                    answer_time_ms,
                } => {
                    self.handle_answer(user_id, question_index, chosen_index, answer_time_ms)
                        .await
                }
                MatchCommand::QuestionDeadline { question_index } => {
                    self.handle_deadline(question_index).await
                }
                MatchCommand::NextQuestion => self.handle_next_question().await,
                MatchCommand::Forfeit { user_id } => self.handle_forfeit(user_id).await,
                MatchCommand::Cancel => {
                    if self.state.status == MatchStatus::Waiting {
                        self.finished.store(true, Ordering::Release);
                        break;
                    }
                }
                MatchCommand::Shutdown => break,
            }
        }
        self.cancel_timers();
        debug!(match_id = %self.state.match_id, "match actor exited");
    }

    fn players(&self) -> [UserId; 2] {
        [
            self.state.players()[0].user_id,
            self.state.players()[1].user_id,
        ]
    }

    fn cancel_timers(&mut self) {
        for timer in [
            self.question_timer.take(),
            self.advance_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.cancel();
        }
    }

    async fn handle_start(&mut self) {
        if self.state.status != MatchStatus::Waiting {
            return;
        }

        let settings = self.state.settings.clone();
        let questions = match self
            .ctx
            .store
            .random_questions(
                &settings.difficulty,
                &settings.category,
                settings.total_questions,
            )
            .await
        {
            Ok(questions) => questions,
            Err(e) => {
                warn!(match_id = %self.state.match_id, error = %e, "question load failed");
                self.abort_unplayable(ErrorCode::InternalError, "failed to load questions")
                    .await;
                return;
            }
        };

        if questions.is_empty() {
            self.abort_unplayable(
                ErrorCode::InsufficientQuestions,
                "no questions available for the requested difficulty and category",
            )
            .await;
            return;
        }

        let question_ids = questions.iter().map(|q| q.id).collect();
        if let Err(e) = self
            .ctx
            .store
            .update_match(
                self.state.match_id,
                MatchRowUpdate {
                    status: Some(MatchRowStatus::Playing),
                    question_ids: Some(question_ids),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(match_id = %self.state.match_id, error = %e, "match row update failed");
        }

        self.state.begin(questions);

        let players = self.players();
        for user in players {
            self.ctx.registry.set_current_match(user, Some(self.state.match_id)).await;
            self.ctx.registry.update_status(user, UserStatus::InGame).await;
        }

        let started = ServerMessage::GameStarted(GameStartedPayload {
            match_id: self.state.match_id,
            players: self
                .state
                .players()
                .iter()
                .map(|p| GamePlayerInfo {
                    user_id: p.user_id,
                    display_name: p.display_name.clone(),
                    health: p.health,
                })
                .collect(),
            game_state: GameStateInfo {
                current_index: 0,
                total_questions: self.state.questions().len(),
                time_per_question_secs: self.state.settings.time_per_question_secs,
            },
            server_time: server_time_ms(),
        });
        self.ctx.router.broadcast_to_match(players, started).await;

        // the full sequence goes out once, without correct indices; the
        // server stays authoritative for correctness and timing
        let questions = ServerMessage::GameQuestions(GameQuestionsPayload {
            match_id: self.state.match_id,
            questions: self
                .state
                .questions()
                .iter()
                .enumerate()
                .map(|(i, q)| QuestionPublic::from_record(i, q))
                .collect(),
        });
        self.ctx.router.broadcast_to_match(players, questions).await;

        info!(
            match_id = %self.state.match_id,
            questions = self.state.questions().len(),
            mode = self.state.settings.mode.as_str(),
            "match started"
        );

        self.arm_question_deadline();
    }

    fn arm_question_deadline(&mut self) {
        if let Some(timer) = self.question_timer.take() {
            timer.cancel();
        }
        self.state.question_started_at = Some(Utc::now());
        let index = self.state.current_index;
        let tx = self.self_tx.clone();
        let deadline = self.ctx.config.question_deadline();
        self.question_timer = Some(schedule(deadline, async move {
            let _ = tx
                .send(MatchCommand::QuestionDeadline {
                    question_index: index,
                })
                .await;
        }));
    }

    fn arm_advance(&mut self, delay: Duration) {
        if let Some(timer) = self.advance_timer.take() {
            timer.cancel();
        }
        let tx = self.self_tx.clone();
        self.advance_timer = Some(schedule(delay, async move {
            let _ = tx.send(MatchCommand::NextQuestion).await;
        }));
    }

    async fn handle_answer(
        &mut self,
        user_id: UserId,
        question_index: usize,
        chosen_index: usize,
        answer_time_ms: u64,
    ) {
        let damage = self.ctx.config.damage_per_answer;
        let outcome = match self.state.submit_answer(
            user_id,
            question_index,
            chosen_index,
            answer_time_ms,
            damage,
        ) {
            Ok(outcome) => outcome,
            Err(AnswerReject::Duplicate) | Err(AnswerReject::WrongQuestion) => {
                debug!(match_id = %self.state.match_id, %user_id, "stale or duplicate answer ignored");
                return;
            }
            Err(AnswerReject::NotParticipant) => {
                self.ctx
                    .router
                    .send_to_user(
                        user_id,
                        ServerMessage::error(ErrorCode::NotInMatch, "not a participant"),
                    )
                    .await;
                return;
            }
            Err(AnswerReject::NotPlaying) => {
                let (code, message) = if self.state.status == MatchStatus::Finished {
                    (ErrorCode::MatchFinished, "match already finished")
                } else {
                    (ErrorCode::InvalidRequest, "match has not started")
                };
                self.ctx
                    .router
                    .send_to_user(user_id, ServerMessage::error(code, message))
                    .await;
                return;
            }
        };

        // duplicates were already filtered in-memory; the row-level unique
        // constraint is the durable backstop
        let row = AnswerRow {
            match_id: self.state.match_id,
            user_id,
            question_index,
            chosen_index,
            correct: outcome.correct,
            answer_time_ms,
            answered_at: Utc::now(),
        };
        match self.ctx.store.insert_answer(row).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(match_id = %self.state.match_id, %user_id, question_index, "answer row already persisted");
            }
            Err(e) => {
                warn!(match_id = %self.state.match_id, error = %e, "answer persistence failed");
            }
        }

        let players = self.players();
        let opponent = players[1 - outcome.slot];

        self.ctx
            .router
            .send_to_user(
                user_id,
                ServerMessage::AnswerReceived(AnswerReceivedPayload {
                    match_id: self.state.match_id,
                    question_index,
                    correct: outcome.correct,
                    correct_answer_index: outcome.correct_index,
                    points: outcome.points,
                    player_health: outcome.answerer_health,
                    opponent_health: outcome.opponent_health,
                }),
            )
            .await;

        self.ctx
            .router
            .send_to_user(
                opponent,
                ServerMessage::OpponentAnswered(OpponentAnsweredPayload {
                    match_id: self.state.match_id,
                    question_index,
                    correct: outcome.correct,
                    animation: if outcome.correct {
                        Animation::Attack
                    } else {
                        Animation::Hurt
                    },
                }),
            )
            .await;

        self.broadcast_battle_update().await;

        if outcome.depleted {
            self.end_game(EndReason::HealthDepleted).await;
        } else if outcome.all_answered {
            if let Some(timer) = self.question_timer.take() {
                timer.cancel();
            }
            self.arm_advance(Duration::from_secs(
                self.ctx.config.inter_question_delay_secs,
            ));
        }
    }

    async fn broadcast_battle_update(&self) {
        let update = ServerMessage::BattleUpdate(BattleUpdatePayload {
            match_id: self.state.match_id,
            healths: self
                .state
                .players()
                .iter()
                .map(|p| PlayerHealth {
                    user_id: p.user_id,
                    health: p.health,
                })
                .collect(),
        });
        self.ctx.router.broadcast_to_match(self.players(), update).await;
    }

    async fn handle_deadline(&mut self, question_index: usize) {
        let damage = self.ctx.config.damage_on_timeout;
        let Some(outcome) = self.state.apply_timeout(question_index, damage) else {
            return;
        };

        let payload = ServerMessage::QuestionTimeout(QuestionTimeoutPayload {
            match_id: self.state.match_id,
            question_index,
            correct_answer_index: outcome.correct_index,
            players: self
                .state
                .players()
                .iter()
                .map(|p| crate::network::protocol::TimeoutPlayerInfo {
                    user_id: p.user_id,
                    took_damage: damage,
                    health: p.health,
                })
                .collect(),
        });
        self.ctx.router.broadcast_to_match(self.players(), payload).await;

        if outcome.depleted {
            self.end_game(EndReason::HealthDepleted).await;
        } else {
            self.arm_advance(Duration::from_secs(
                self.ctx.config.inter_question_delay_secs,
            ));
        }
    }

    async fn handle_next_question(&mut self) {
        if self.state.status != MatchStatus::Playing {
            return;
        }
        match self.state.advance_question() {
            Some(_) => self.arm_question_deadline(),
            None => self.end_game(EndReason::AllQuestionsAnswered).await,
        }
    }

    async fn handle_forfeit(&mut self, user_id: UserId) {
        if self.state.status == MatchStatus::Finished || !self.state.is_participant(user_id) {
            return;
        }

        // the opponent learns about the walkover before game.over
        if let Some(opponent) = self.state.opponent_of(user_id) {
            self.ctx
                .router
                .send_to_user(
                    opponent,
                    ServerMessage::PlayerDisconnected(PlayerDisconnectedPayload {
                        match_id: self.state.match_id,
                        user_id,
                        auto_win: true,
                    }),
                )
                .await;
        }

        if self.state.finish_forfeit(user_id) {
            self.finalize().await;
        }
    }

    async fn handle_attach(&mut self, user_id: UserId) {
        if !self.state.is_participant(user_id) {
            self.ctx
                .router
                .send_to_user(
                    user_id,
                    ServerMessage::error(ErrorCode::NotInMatch, "not a participant"),
                )
                .await;
            return;
        }

        match self.state.status {
            MatchStatus::Finished => {
                self.ctx
                    .router
                    .send_to_user(
                        user_id,
                        ServerMessage::error(ErrorCode::MatchFinished, "match already finished"),
                    )
                    .await;
            }
            MatchStatus::Playing => {
                self.ctx
                    .router
                    .send_to_user(
                        user_id,
                        ServerMessage::error(
                            ErrorCode::InvalidRequest,
                            "match already in progress",
                        ),
                    )
                    .await;
            }
            MatchStatus::Waiting => {
                let session = self.ctx.registry.lookup_by_user(user_id).await;
                let Some(session) = session else { return };

                self.ctx
                    .registry
                    .set_current_match(user_id, Some(self.state.match_id))
                    .await;
                self.ctx.registry.touch_ping(session.session_id).await;

                self.ctx
                    .router
                    .send_to_user(
                        user_id,
                        ServerMessage::Reconnected(ReconnectedPayload {
                            session_id: session.session_id,
                            match_id: Some(self.state.match_id),
                        }),
                    )
                    .await;

                if let Some(opponent) = self.state.opponent_of(user_id) {
                    self.ctx
                        .router
                        .send_to_user(
                            opponent,
                            ServerMessage::PlayerReconnected(PlayerReconnectedPayload {
                                match_id: self.state.match_id,
                                user_id,
                            }),
                        )
                        .await;
                }
            }
        }
    }

    /// Terminal path for matches that never became playable.
    async fn abort_unplayable(&mut self, code: ErrorCode, message: &str) {
        self.state.finish(EndReason::InsufficientQuestions);
        self.cancel_timers();

        let players = self.players();
        self.ctx
            .router
            .broadcast_to_match(players, ServerMessage::error(code, message))
            .await;

        if let Err(e) = self
            .ctx
            .store
            .update_match(
                self.state.match_id,
                MatchRowUpdate {
                    status: Some(MatchRowStatus::Cancelled),
                    finished_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(match_id = %self.state.match_id, error = %e, "match row update failed");
        }

        for user in players {
            self.ctx.registry.set_current_match(user, None).await;
            self.ctx.registry.update_status(user, UserStatus::Online).await;
        }

        self.finished.store(true, Ordering::Release);
        self.schedule_removal();
    }

    async fn end_game(&mut self, reason: EndReason) {
        if self.state.finish(reason) {
            self.finalize().await;
        }
    }

    /// Runs exactly once per match, guarded by the idempotent `finish`.
    async fn finalize(&mut self) {
        self.cancel_timers();
        settlement::settle(&self.ctx, &self.state).await;
        self.finished.store(true, Ordering::Release);
        self.schedule_removal();
    }

    /// The finished match stays addressable for a short grace window,
    /// then leaves the table and the actor exits.
    fn schedule_removal(&mut self) {
        let matches = self.ctx.matches.clone();
        let match_id = self.state.match_id;
        let tx = self.self_tx.clone();
        let delay = Duration::from_secs(self.ctx.config.cleanup_delay_secs);
        schedule(delay, async move {
            matches.remove(match_id).await;
            let _ = tx.send(MatchCommand::Shutdown).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::ids::SessionId;
    use crate::game::state::{MatchMode, MatchSettings};
    use crate::network::session::Session;
    use crate::store::{MemoryStore, QuestionRecord, MatchRow, MatchRowStatus};
    use uuid::Uuid;

    fn test_config() -> ServerConfig {
        ServerConfig {
            question_time_secs: 30,
            question_grace_secs: 0,
            inter_question_delay_secs: 0,
            start_delay_secs: 0,
            cleanup_delay_secs: 0,
            ..Default::default()
        }
    }

    fn settings(total: usize) -> MatchSettings {
        MatchSettings {
            mode: MatchMode::Casual,
            difficulty: "easy".into(),
            category: "all".into(),
            total_questions: total,
            time_per_question_secs: 30,
        }
    }

    async fn setup(
        config: ServerConfig,
        total_questions: usize,
    ) -> (
        AppContext,
        Arc<MemoryStore>,
        MatchHandle,
        (UserId, mpsc::Receiver<ServerMessage>),
        (UserId, mpsc::Receiver<ServerMessage>),
    ) {
        let store = Arc::new(MemoryStore::new());
        let ctx = AppContext::new(config, store.clone());

        let a = UserId::generate();
        let b = UserId::generate();
        store.seed_user(a, "alice").await;
        store.seed_user(b, "bob").await;
        for _ in 0..total_questions.max(1) {
            store
                .seed_question(QuestionRecord {
                    id: Uuid::new_v4(),
                    text: "?".into(),
                    choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_index: 2,
                    difficulty: "easy".into(),
                    category: "history".into(),
                })
                .await;
        }

        let (tx_a, rx_a) = mpsc::channel(64);
        let (tx_b, rx_b) = mpsc::channel(64);
        ctx.registry
            .register(Session::new(SessionId::generate(), a, "alice".into(), tx_a))
            .await;
        ctx.registry
            .register(Session::new(SessionId::generate(), b, "bob".into(), tx_b))
            .await;

        let match_id = MatchId::generate();
        store
            .insert_match(MatchRow {
                id: match_id,
                players: [a, b],
                mode: "casual".into(),
                difficulty: "easy".into(),
                category: "all".into(),
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
            .unwrap();

        let state = MatchState::new(
            match_id,
            settings(total_questions),
            (a, "alice".into()),
            (b, "bob".into()),
        );
        let handle = spawn_match(&ctx, state).await;

        (ctx, store, handle, (a, rx_a), (b, rx_b))
    }

    async fn recv_until<F>(rx: &mut mpsc::Receiver<ServerMessage>, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("channel closed");
            if pred(&msg) {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn test_happy_path_single_question() {
        // one question, A correct, B wrong; A wins on correct count
        let (_ctx, store, handle, (a, mut rx_a), (b, mut rx_b)) =
            setup(test_config(), 1).await;

        handle.send(MatchCommand::Start).await;

        recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameStarted(_))).await;
        let questions =
            recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameQuestions(_))).await;
        match &questions {
            ServerMessage::GameQuestions(p) => assert_eq!(p.questions.len(), 1),
            _ => unreachable!(),
        }
        recv_until(&mut rx_b, |m| matches!(m, ServerMessage::GameStarted(_))).await;

        handle
            .send(MatchCommand::SubmitAnswer {
                user_id: a,
                question_index: 0,
                chosen_index: 2,
                answer_time_ms: 3000,
            })
            .await;
        handle
            .send(MatchCommand::SubmitAnswer {
                user_id: b,
                question_index: 0,
                chosen_index: 0,
                answer_time_ms: 4000,
            })
            .await;

        let received =
            recv_until(&mut rx_a, |m| matches!(m, ServerMessage::AnswerReceived(_))).await;
        match received {
            ServerMessage::AnswerReceived(p) => {
                assert!(p.correct);
                assert_eq!(p.player_health, 100);
                assert_eq!(p.opponent_health, 90);
            }
            _ => unreachable!(),
        }

        let received =
            recv_until(&mut rx_b, |m| matches!(m, ServerMessage::AnswerReceived(_))).await;
        match received {
            ServerMessage::AnswerReceived(p) => {
                assert!(!p.correct);
                assert_eq!(p.player_health, 90);
                assert_eq!(p.opponent_health, 100);
            }
            _ => unreachable!(),
        }

        let over = recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameOver(_))).await;
        match over {
            ServerMessage::GameOver(p) => {
                assert_eq!(p.winner, Some(a));
                assert_eq!(p.loser, Some(b));
                assert_eq!(p.reason, EndReason::AllQuestionsAnswered);
                let winner_rewards = p
                    .rewards
                    .iter()
                    .find(|r| r.user_id == a)
                    .unwrap()
                    .rewards;
                assert_eq!(winner_rewards.points, 100);
                assert_eq!(winner_rewards.xp, 150);
                assert_eq!(winner_rewards.coins, 50);
            }
            _ => unreachable!(),
        }
        recv_until(&mut rx_b, |m| matches!(m, ServerMessage::GameOver(_))).await;

        assert!(handle.is_finished());
        let row = store.match_row(handle.match_id).await.unwrap();
        assert_eq!(row.status, MatchRowStatus::Finished);
        assert_eq!(row.winner, Some(a));
        assert_eq!(store.answers_for_match(handle.match_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_question_timeout_damages_both() {
        let mut config = test_config();
        config.question_time_secs = 0;
        let (_ctx, _store, handle, (_a, mut rx_a), (_b, _rx_b)) = setup(config, 3).await;

        handle.send(MatchCommand::Start).await;

        let timeout =
            recv_until(&mut rx_a, |m| matches!(m, ServerMessage::QuestionTimeout(_))).await;
        match timeout {
            ServerMessage::QuestionTimeout(p) => {
                assert_eq!(p.correct_answer_index, 2);
                assert_eq!(p.players.len(), 2);
                assert!(p.players.iter().all(|pl| pl.took_damage == 10));
                assert!(p.players.iter().all(|pl| pl.health == 90));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_double_timeouts_end_with_player_a_win() {
        // with a zero deadline every question times out; after ten,
        // both are at zero and the tie-break goes to player A
        let mut config = test_config();
        config.question_time_secs = 0;
        let (_ctx, _store, handle, (a, mut rx_a), (_b, _rx_b)) = setup(config, 50).await;

        handle.send(MatchCommand::Start).await;

        let over = recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameOver(_))).await;
        match over {
            ServerMessage::GameOver(p) => {
                assert_eq!(p.reason, EndReason::HealthDepleted);
                assert_eq!(p.winner, Some(a));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_forfeit_on_disconnect() {
        // opponent sees the disconnect notice, then game.over
        let (_ctx, _store, handle, (a, mut rx_a), (b, _rx_b)) = setup(test_config(), 5).await;

        handle.send(MatchCommand::Start).await;
        recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameStarted(_))).await;

        handle.send(MatchCommand::Forfeit { user_id: b }).await;

        let disconnected = recv_until(&mut rx_a, |m| {
            matches!(
                m,
                ServerMessage::PlayerDisconnected(_) | ServerMessage::GameOver(_)
            )
        })
        .await;
        match disconnected {
            ServerMessage::PlayerDisconnected(p) => {
                assert!(p.auto_win);
                assert_eq!(p.user_id, b);
            }
            other => panic!("expected disconnect before game over, got {other:?}"),
        }

        let over = recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameOver(_))).await;
        match over {
            ServerMessage::GameOver(p) => {
                assert_eq!(p.winner, Some(a));
                assert_eq!(p.reason, EndReason::PlayerDisconnected);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_forfeit_is_idempotent() {
        // a second terminal command must not produce a second game.over
        let (_ctx, _store, handle, (_a, mut rx_a), (b, _rx_b)) = setup(test_config(), 5).await;

        handle.send(MatchCommand::Start).await;
        handle.send(MatchCommand::Forfeit { user_id: b }).await;
        handle.send(MatchCommand::Forfeit { user_id: b }).await;

        recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameOver(_))).await;

        // drain whatever is left; no second game.over may appear
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut extra_game_over = 0;
        while let Ok(msg) = rx_a.try_recv() {
            if matches!(msg, ServerMessage::GameOver(_)) {
                extra_game_over += 1;
            }
        }
        assert_eq!(extra_game_over, 0);
    }

    #[tokio::test]
    async fn test_insufficient_questions() {
        let store = Arc::new(MemoryStore::new());
        let ctx = AppContext::new(test_config(), store.clone());
        let a = UserId::generate();
        let b = UserId::generate();
        store.seed_user(a, "alice").await;
        store.seed_user(b, "bob").await;

        let (tx_a, mut rx_a) = mpsc::channel(16);
        ctx.registry
            .register(Session::new(SessionId::generate(), a, "alice".into(), tx_a))
            .await;
        let (tx_b, _rx_b) = mpsc::channel(16);
        ctx.registry
            .register(Session::new(SessionId::generate(), b, "bob".into(), tx_b))
            .await;

        let match_id = MatchId::generate();
        store
            .insert_match(MatchRow {
                id: match_id,
                players: [a, b],
                mode: "casual".into(),
                difficulty: "hard".into(),
                category: "space".into(),
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
            .unwrap();

        let state = MatchState::new(
            match_id,
            MatchSettings {
                mode: MatchMode::Casual,
                difficulty: "hard".into(),
                category: "space".into(),
                total_questions: 5,
                time_per_question_secs: 10,
            },
            (a, "alice".into()),
            (b, "bob".into()),
        );
        let handle = spawn_match(&ctx, state).await;
        handle.send(MatchCommand::Start).await;

        let err = recv_until(&mut rx_a, |m| matches!(m, ServerMessage::Error(_))).await;
        match err {
            ServerMessage::Error(p) => assert_eq!(p.code, ErrorCode::InsufficientQuestions),
            _ => unreachable!(),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let row = store.match_row(match_id).await.unwrap();
        assert_eq!(row.status, MatchRowStatus::Cancelled);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_attach_during_waiting_only() {
        let (ctx, _store, handle, (a, mut rx_a), (b, mut rx_b)) = setup(test_config(), 2).await;

        // waiting phase: attach succeeds and the opponent is told
        handle.send(MatchCommand::Attach { user_id: a }).await;
        let msg = recv_until(&mut rx_a, |m| matches!(m, ServerMessage::Reconnected(_))).await;
        match msg {
            ServerMessage::Reconnected(p) => assert_eq!(p.match_id, Some(handle.match_id)),
            _ => unreachable!(),
        }
        recv_until(&mut rx_b, |m| matches!(m, ServerMessage::PlayerReconnected(_))).await;

        // playing phase: attach is refused
        handle.send(MatchCommand::Start).await;
        recv_until(&mut rx_a, |m| matches!(m, ServerMessage::GameStarted(_))).await;
        handle.send(MatchCommand::Attach { user_id: b }).await;
        let err = recv_until(&mut rx_b, |m| matches!(m, ServerMessage::Error(_))).await;
        match err {
            ServerMessage::Error(p) => assert_eq!(p.code, ErrorCode::InvalidRequest),
            _ => unreachable!(),
        }

        let _ = ctx;
    }

    #[tokio::test]
    async fn test_match_removed_from_table_after_cleanup_delay() {
        let (ctx, _store, handle, (_a, _rx_a), (b, _rx_b)) = setup(test_config(), 1).await;

        handle.send(MatchCommand::Start).await;
        handle.send(MatchCommand::Forfeit { user_id: b }).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ctx.matches.get(handle.match_id).await.is_none());
    }
}
