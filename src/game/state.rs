//! Match State
//!
//! The authoritative per-match state machine. Pure data and transitions;
//! everything async (timers, broadcasts, persistence) lives in the engine
//! actor that owns one of these per match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{MatchId, UserId};
use crate::store::QuestionRecord;

/// Starting health of both players.
pub const INITIAL_HEALTH: i32 = 100;

/// Match modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Public casual queue.
    Casual,
    /// Rated queue with MMR pairing.
    Ranked,
    /// Private match arranged between friends or in a lobby.
    Friend,
}

impl MatchMode {
    /// Stable label used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Casual => "casual",
            MatchMode::Ranked => "ranked",
            MatchMode::Friend => "friend",
        }
    }

    /// Whether this mode updates ratings at settlement.
    pub fn is_ranked(&self) -> bool {
        matches!(self, MatchMode::Ranked)
    }
}

/// Settings a match is created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSettings {
    /// Match mode.
    pub mode: MatchMode,
    /// Question difficulty filter.
    pub difficulty: String,
    /// Question category filter ("all" = any).
    pub category: String,
    /// Number of questions.
    pub total_questions: usize,
    /// Seconds allowed per question.
    #[serde(rename = "timePerQuestionSec")]
    pub time_per_question_secs: u64,
}

/// Match lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Created, not yet started (confirmation / start delay window).
    Waiting,
    /// Questions are live.
    Playing,
    /// Terminal. Re-entry is rejected.
    Finished,
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The question sequence was exhausted.
    AllQuestionsAnswered,
    /// A player's health reached zero.
    HealthDepleted,
    /// A player's socket closed mid-match.
    PlayerDisconnected,
    /// The question bank had nothing for the requested filters.
    InsufficientQuestions,
}

/// One player's side of the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSlot {
    /// Player identity.
    pub user_id: UserId,
    /// Display name, snapshotted at match creation.
    pub display_name: String,
    /// Remaining health, always within `0..=100`.
    pub health: i32,
    /// Correct answers so far.
    pub correct_count: u32,
    /// Accumulated display points.
    pub points: u32,
    /// Whether this player has answered the current question.
    pub answered_current: bool,
}

impl PlayerSlot {
    fn new(user_id: UserId, display_name: String) -> Self {
        Self {
            user_id,
            display_name,
            health: INITIAL_HEALTH,
            correct_count: 0,
            points: 0,
            answered_current: false,
        }
    }
}

/// One accepted answer, kept in order for the game history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    /// Answering player.
    pub user_id: UserId,
    /// Question position.
    pub question_index: usize,
    /// Choice picked.
    pub chosen_index: usize,
    /// Whether it was correct.
    pub correct: bool,
    /// Client-reported answer time.
    pub answer_time_ms: u64,
    /// Display points awarded.
    pub points: u32,
}

/// Outcome of evaluating one answer.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    /// Slot index (0 or 1) of the answerer.
    pub slot: usize,
    /// Whether the answer was correct.
    pub correct: bool,
    /// Canonical correct index for the question.
    pub correct_index: usize,
    /// Display points awarded.
    pub points: u32,
    /// Answerer health after damage.
    pub answerer_health: i32,
    /// Opponent health after damage.
    pub opponent_health: i32,
    /// Whether either health reached zero.
    pub depleted: bool,
    /// Whether both players have now answered the current question.
    pub all_answered: bool,
}

/// Outcome of a question deadline firing.
#[derive(Debug, Clone)]
pub struct TimeoutOutcome {
    /// Canonical correct index for the timed-out question.
    pub correct_index: usize,
    /// Healths after the timeout penalty, slot order.
    pub healths: [i32; 2],
    /// Whether either health reached zero.
    pub depleted: bool,
}

/// Why an answer submission was not accepted. `Duplicate` and
/// `WrongQuestion` are silent drops; the rest surface as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerReject {
    /// Match is not in the playing phase.
    NotPlaying,
    /// Submitter is not one of the two players.
    NotParticipant,
    /// Index does not match the current question.
    WrongQuestion,
    /// The player already answered this question.
    Duplicate,
}

/// Authoritative state of one match. The engine actor is the sole writer.
#[derive(Debug, Clone)]
pub struct MatchState {
    /// Match identifier.
    pub match_id: MatchId,
    /// Settings the match was created with.
    pub settings: MatchSettings,
    players: [PlayerSlot; 2],
    questions: Vec<QuestionRecord>,
    /// Position in the question sequence. Monotone non-decreasing.
    pub current_index: usize,
    /// When the current question was served.
    pub question_started_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: MatchStatus,
    answers: Vec<AnswerEntry>,
    /// Terminal reason, set once.
    pub end_reason: Option<EndReason>,
    /// Winner, set at finish. `None` only for `InsufficientQuestions`.
    pub winner: Option<UserId>,
}

impl MatchState {
    /// Create a match in `Waiting` with full health on both sides.
    pub fn new(
        match_id: MatchId,
        settings: MatchSettings,
        player_a: (UserId, String),
        player_b: (UserId, String),
    ) -> Self {
        Self {
            match_id,
            settings,
            players: [
                PlayerSlot::new(player_a.0, player_a.1),
                PlayerSlot::new(player_b.0, player_b.1),
            ],
            questions: Vec::new(),
            current_index: 0,
            question_started_at: None,
            status: MatchStatus::Waiting,
            answers: Vec::new(),
            end_reason: None,
            winner: None,
        }
    }

    /// Install the question sequence and enter `Playing`.
    pub fn begin(&mut self, questions: Vec<QuestionRecord>) {
        debug_assert!(!questions.is_empty());
        self.questions = questions;
        self.status = MatchStatus::Playing;
        self.current_index = 0;
    }

    /// Both player slots, A first.
    pub fn players(&self) -> &[PlayerSlot; 2] {
        &self.players
    }

    /// Slot index for a user.
    pub fn slot_of(&self, user: UserId) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user)
    }

    /// Whether the user is one of the two players.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.slot_of(user).is_some()
    }

    /// The user occupying the other slot.
    pub fn opponent_of(&self, user: UserId) -> Option<UserId> {
        self.slot_of(user).map(|i| self.players[1 - i].user_id)
    }

    /// The question currently live, if any.
    pub fn current_question(&self) -> Option<&QuestionRecord> {
        self.questions.get(self.current_index)
    }

    /// The full question sequence.
    pub fn questions(&self) -> &[QuestionRecord] {
        &self.questions
    }

    /// Accepted answers, in arrival order.
    pub fn answers(&self) -> &[AnswerEntry] {
        &self.answers
    }

    /// Healths in slot order.
    pub fn healths(&self) -> [i32; 2] {
        [self.players[0].health, self.players[1].health]
    }

    /// Display points in slot order.
    pub fn points(&self) -> [u32; 2] {
        [self.players[0].points, self.players[1].points]
    }

    /// Evaluate an answer against the current question.
    ///
    /// `damage` is the per-answer health cost: a wrong answer damages the
    /// answerer, a correct one damages the opponent. Duplicate submissions
    /// for the same question are rejected without effect.
    pub fn submit_answer(
        &mut self,
        user: UserId,
        question_index: usize,
        chosen_index: usize,
        answer_time_ms: u64,
        damage: i32,
    ) -> Result<AnswerOutcome, AnswerReject> {
        if self.status != MatchStatus::Playing {
            return Err(AnswerReject::NotPlaying);
        }
        let slot = self.slot_of(user).ok_or(AnswerReject::NotParticipant)?;
        if question_index != self.current_index {
            return Err(AnswerReject::WrongQuestion);
        }
        if self.players[slot].answered_current {
            return Err(AnswerReject::Duplicate);
        }

        // current_index is always in range while Playing
        let correct_index = self.questions[self.current_index].correct_index;
        let correct = chosen_index == correct_index;

        let points = if correct {
            display_points(answer_time_ms, self.settings.time_per_question_secs)
        } else {
            0
        };

        let target = if correct { 1 - slot } else { slot };
        self.players[target].health = clamp_health(self.players[target].health - damage);

        let player = &mut self.players[slot];
        player.answered_current = true;
        player.points += points;
        if correct {
            player.correct_count += 1;
        }

        self.answers.push(AnswerEntry {
            user_id: user,
            question_index,
            chosen_index,
            correct,
            answer_time_ms,
            points,
        });

        Ok(AnswerOutcome {
            slot,
            correct,
            correct_index,
            points,
            answerer_health: self.players[slot].health,
            opponent_health: self.players[1 - slot].health,
            depleted: self.players.iter().any(|p| p.health == 0),
            all_answered: self.players.iter().all(|p| p.answered_current),
        })
    }

    /// Apply the deadline penalty for `question_index`.
    ///
    /// Returns `None` when the match has moved on (the question already
    /// advanced, or the match ended) so a late timer is a no-op.
    pub fn apply_timeout(&mut self, question_index: usize, damage: i32) -> Option<TimeoutOutcome> {
        if self.status != MatchStatus::Playing || question_index != self.current_index {
            return None;
        }

        let correct_index = self.questions[self.current_index].correct_index;
        for player in &mut self.players {
            player.health = clamp_health(player.health - damage);
            // the timeout reveals the answer; late submissions for this
            // question are rejected as duplicates
            player.answered_current = true;
        }

        Some(TimeoutOutcome {
            correct_index,
            healths: self.healths(),
            depleted: self.players.iter().any(|p| p.health == 0),
        })
    }

    /// Move to the next question. Returns the new index, or `None` when
    /// the sequence is exhausted.
    pub fn advance_question(&mut self) -> Option<usize> {
        if self.status != MatchStatus::Playing {
            return None;
        }
        self.current_index += 1;
        for player in &mut self.players {
            player.answered_current = false;
        }
        if self.current_index >= self.questions.len() {
            None
        } else {
            Some(self.current_index)
        }
    }

    /// Flip to `Finished` with the winner determined by `reason`.
    ///
    /// Idempotent: the first call wins, later calls return `false` and
    /// change nothing.
    pub fn finish(&mut self, reason: EndReason) -> bool {
        if self.status == MatchStatus::Finished {
            return false;
        }
        self.status = MatchStatus::Finished;
        self.end_reason = Some(reason);
        self.winner = match reason {
            EndReason::HealthDepleted | EndReason::AllQuestionsAnswered => {
                Some(self.decide_winner(reason))
            }
            // forfeits go through finish_forfeit; this arm covers engine
            // shutdown paths where the loser was already recorded
            EndReason::PlayerDisconnected => self.winner,
            EndReason::InsufficientQuestions => None,
        };
        true
    }

    /// Flip to `Finished` with the disconnecting player losing
    /// unconditionally. Idempotent like [`finish`](Self::finish).
    pub fn finish_forfeit(&mut self, loser: UserId) -> bool {
        if self.status == MatchStatus::Finished {
            return false;
        }
        self.status = MatchStatus::Finished;
        self.end_reason = Some(EndReason::PlayerDisconnected);
        self.winner = self.opponent_of(loser).or(Some(self.players[0].user_id));
        true
    }

    /// The loser, once finished with a winner.
    pub fn loser(&self) -> Option<UserId> {
        self.winner.and_then(|w| self.opponent_of(w))
    }

    fn decide_winner(&self, reason: EndReason) -> UserId {
        let [a, b] = &self.players;
        let winner_slot = match reason {
            // higher health wins; tie resolves to player A
            EndReason::HealthDepleted => usize::from(b.health > a.health),
            // higher correct count, then higher points, then player A
            _ => usize::from((b.correct_count, b.points) > (a.correct_count, a.points)),
        };
        self.players[winner_slot].user_id
    }
}

/// Clamp a health value into `0..=100`.
pub fn clamp_health(health: i32) -> i32 {
    health.clamp(0, INITIAL_HEALTH)
}

/// Display points for a correct answer: `round(100 * (1 + remaining/limit))`.
/// Telemetry only; never part of the win condition beyond tie-breaking.
pub fn display_points(answer_time_ms: u64, time_limit_secs: u64) -> u32 {
    let limit_ms = (time_limit_secs.max(1) * 1000) as f64;
    let remaining = (limit_ms - answer_time_ms as f64).max(0.0);
    (100.0 * (1.0 + remaining / limit_ms)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn settings(total: usize) -> MatchSettings {
        MatchSettings {
            mode: MatchMode::Casual,
            difficulty: "easy".into(),
            category: "all".into(),
            total_questions: total,
            time_per_question_secs: 10,
        }
    }

    fn question(correct_index: usize) -> QuestionRecord {
        QuestionRecord {
            id: Uuid::new_v4(),
            text: "?".into(),
            choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_index,
            difficulty: "easy".into(),
            category: "all".into(),
        }
    }

    fn playing_match(total: usize) -> (MatchState, UserId, UserId) {
        let a = UserId::generate();
        let b = UserId::generate();
        let mut state = MatchState::new(
            MatchId::generate(),
            settings(total),
            (a, "alice".into()),
            (b, "bob".into()),
        );
        state.begin((0..total).map(|_| question(2)).collect());
        (state, a, b)
    }

    #[test]
    fn test_correct_answer_damages_opponent() {
        let (mut state, a, _) = playing_match(5);
        let outcome = state.submit_answer(a, 0, 2, 3000, 10).unwrap();
        assert!(outcome.correct);
        assert_eq!(outcome.answerer_health, 100);
        assert_eq!(outcome.opponent_health, 90);
    }

    #[test]
    fn test_wrong_answer_damages_self() {
        let (mut state, _, b) = playing_match(5);
        let outcome = state.submit_answer(b, 0, 0, 4000, 10).unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.points, 0);
        assert_eq!(outcome.answerer_health, 90);
        assert_eq!(outcome.opponent_health, 100);
    }

    #[test]
    fn test_duplicate_answer_rejected() {
        let (mut state, a, _) = playing_match(5);
        state.submit_answer(a, 0, 2, 1000, 10).unwrap();
        let err = state.submit_answer(a, 0, 1, 2000, 10).unwrap_err();
        assert_eq!(err, AnswerReject::Duplicate);
        assert_eq!(state.answers().len(), 1);
    }

    #[test]
    fn test_stale_question_index_rejected() {
        let (mut state, a, b) = playing_match(5);
        state.submit_answer(a, 0, 2, 1000, 10).unwrap();
        state.submit_answer(b, 0, 2, 1000, 10).unwrap();
        state.advance_question();
        let err = state.submit_answer(a, 0, 2, 1000, 10).unwrap_err();
        assert_eq!(err, AnswerReject::WrongQuestion);
    }

    #[test]
    fn test_non_participant_rejected() {
        let (mut state, _, _) = playing_match(5);
        let err = state
            .submit_answer(UserId::generate(), 0, 2, 1000, 10)
            .unwrap_err();
        assert_eq!(err, AnswerReject::NotParticipant);
    }

    #[test]
    fn test_all_answered_flag() {
        let (mut state, a, b) = playing_match(5);
        let first = state.submit_answer(a, 0, 2, 1000, 10).unwrap();
        assert!(!first.all_answered);
        let second = state.submit_answer(b, 0, 0, 1500, 10).unwrap();
        assert!(second.all_answered);
    }

    #[test]
    fn test_health_depletion_ends_before_last_question() {
        // B answers everything wrong, A everything right: B bleeds 20 per
        // question (own miss plus A's hit) and bottoms out on question 5
        // of 20
        let (mut state, a, b) = playing_match(20);
        let mut depleted_at = None;
        for i in 0..20 {
            state.submit_answer(a, i, 2, 1000, 10).unwrap();
            let outcome = state.submit_answer(b, i, 0, 1000, 10).unwrap();
            if outcome.depleted {
                depleted_at = Some(i);
                break;
            }
            state.advance_question();
        }
        assert_eq!(depleted_at, Some(4));
        assert_eq!(state.healths()[1], 0);
        assert!(state.finish(EndReason::HealthDepleted));
        assert_eq!(state.winner, Some(a));
        assert_eq!(state.loser(), Some(b));
    }

    #[test]
    fn test_timeout_damages_both() {
        let (mut state, a, _) = playing_match(5);
        let outcome = state.apply_timeout(0, 10).unwrap();
        assert_eq!(outcome.healths, [90, 90]);
        assert_eq!(outcome.correct_index, 2);
        assert!(!outcome.depleted);

        // the timeout resolved the question; a late answer changes nothing
        let err = state.submit_answer(a, 0, 2, 9000, 10).unwrap_err();
        assert_eq!(err, AnswerReject::Duplicate);
        assert_eq!(state.healths(), [90, 90]);
    }

    #[test]
    fn test_late_timeout_is_noop() {
        let (mut state, a, b) = playing_match(5);
        state.submit_answer(a, 0, 2, 1000, 10).unwrap();
        state.submit_answer(b, 0, 2, 1000, 10).unwrap();
        state.advance_question();
        assert!(state.apply_timeout(0, 10).is_none());
        assert_eq!(state.healths(), [100, 100]);
    }

    #[test]
    fn test_consecutive_timeouts_deplete_both_tiebreak_a() {
        // ten double-timeouts drain both players to zero
        let (mut state, a, _) = playing_match(50);
        for i in 0..10 {
            let outcome = state.apply_timeout(i, 10).unwrap();
            if i < 9 {
                assert!(!outcome.depleted);
                state.advance_question();
            } else {
                assert!(outcome.depleted);
                assert_eq!(outcome.healths, [0, 0]);
            }
        }
        state.finish(EndReason::HealthDepleted);
        assert_eq!(state.winner, Some(a));
    }

    #[test]
    fn test_winner_by_correct_count() {
        let (mut state, a, b) = playing_match(2);
        state.submit_answer(a, 0, 2, 1000, 10).unwrap();
        state.submit_answer(b, 0, 0, 1000, 10).unwrap();
        state.advance_question();
        state.submit_answer(a, 1, 2, 1000, 10).unwrap();
        state.submit_answer(b, 1, 0, 1000, 10).unwrap();
        assert!(state.advance_question().is_none());
        state.finish(EndReason::AllQuestionsAnswered);
        assert_eq!(state.winner, Some(a));
    }

    #[test]
    fn test_winner_tie_on_correct_falls_to_points() {
        let (mut state, a, b) = playing_match(1);
        // both correct, B faster -> more points
        state.submit_answer(a, 0, 2, 9000, 10).unwrap();
        state.submit_answer(b, 0, 2, 1000, 10).unwrap();
        state.finish(EndReason::AllQuestionsAnswered);
        assert_eq!(state.winner, Some(b));
    }

    #[test]
    fn test_full_tie_resolves_to_player_a() {
        let (mut state, a, b) = playing_match(1);
        state.submit_answer(a, 0, 2, 5000, 10).unwrap();
        state.submit_answer(b, 0, 2, 5000, 10).unwrap();
        state.finish(EndReason::AllQuestionsAnswered);
        assert_eq!(state.winner, Some(a));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (mut state, a, b) = playing_match(1);
        assert!(state.finish_forfeit(b));
        assert_eq!(state.winner, Some(a));
        // later transitions must not overwrite the outcome
        assert!(!state.finish(EndReason::AllQuestionsAnswered));
        assert!(!state.finish_forfeit(a));
        assert_eq!(state.winner, Some(a));
        assert_eq!(state.end_reason, Some(EndReason::PlayerDisconnected));
    }

    #[test]
    fn test_answers_after_finish_rejected() {
        let (mut state, a, _) = playing_match(5);
        state.finish(EndReason::HealthDepleted);
        let err = state.submit_answer(a, 0, 2, 1000, 10).unwrap_err();
        assert_eq!(err, AnswerReject::NotPlaying);
    }

    #[test]
    fn test_display_points_bounds() {
        // instant answer -> full bonus, at-limit answer -> base 100
        assert_eq!(display_points(0, 10), 200);
        assert_eq!(display_points(10_000, 10), 100);
        assert_eq!(display_points(3000, 10), 170);
        // over-limit times never go below the base
        assert_eq!(display_points(25_000, 10), 100);
    }

    proptest! {
        #[test]
        fn prop_health_always_clamped(
            answers in proptest::collection::vec((0usize..4, 0u64..12_000), 0..40)
        ) {
            let (mut state, a, b) = playing_match(40);
            for (i, (choice, time)) in answers.into_iter().enumerate() {
                let user = if i % 2 == 0 { a } else { b };
                let index = state.current_index;
                let _ = state.submit_answer(user, index, choice, time, 10);
                if i % 3 == 2 {
                    let _ = state.apply_timeout(index, 10);
                    if state.advance_question().is_none() {
                        break;
                    }
                }
                let [ha, hb] = state.healths();
                prop_assert!((0..=100).contains(&ha));
                prop_assert!((0..=100).contains(&hb));
            }
        }

        #[test]
        fn prop_current_index_monotone(steps in 0usize..60) {
            let (mut state, _, _) = playing_match(10);
            let mut last = state.current_index;
            for _ in 0..steps {
                if state.advance_question().is_none() {
                    break;
                }
                prop_assert!(state.current_index >= last);
                prop_assert!(state.current_index <= state.questions().len());
                last = state.current_index;
            }
        }
    }
}
