//! Settlement Pipeline
//!
//! Runs once per match, on the first transition to `finished`: persists
//! the outcome, applies counter deltas and rewards, updates Elo rating for
//! ranked matches, fires the achievement/mission/notification hooks, and
//! broadcasts `game.over`. Counter updates strictly precede the hooks so
//! they always observe post-match stats.

use chrono::Utc;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::core::ids::UserId;
use crate::game::rating::{self, TierInfo};
use crate::game::state::MatchState;
use crate::network::protocol::{
    GameOverPayload, MmrChangedPayload, PlayerHealth, PlayerRewards, RewardsInfo, ServerMessage,
    UserStatus,
};
use crate::store::{
    MatchOutcomeEvent, MatchResult, MatchRowStatus, MatchRowUpdate, NotificationRow, StatsDelta,
    Store, UserStats,
};

/// Rewards credited to the winner.
pub const WINNER_REWARDS: RewardsInfo = RewardsInfo {
    points: 100,
    xp: 150,
    coins: 50,
};

/// Rewards credited to the loser.
pub const LOSER_REWARDS: RewardsInfo = RewardsInfo {
    points: 30,
    xp: 50,
    coins: 10,
};

/// Settle a finished match. The caller guarantees this runs exactly once
/// (the engine's idempotent `finish` guards re-entry).
pub async fn settle(ctx: &AppContext, state: &MatchState) {
    let Some(end_reason) = state.end_reason else {
        warn!(match_id = %state.match_id, "settle called on an unfinished match");
        return;
    };
    let players: [UserId; 2] = [state.players()[0].user_id, state.players()[1].user_id];
    let winner = state.winner;
    let loser = state.loser();

    // 1. persist the outcome; failures log and the pipeline continues so
    //    game-over delivery is never blocked on storage
    if let Err(e) = ctx
        .store
        .update_match(
            state.match_id,
            MatchRowUpdate {
                status: Some(MatchRowStatus::Finished),
                winner,
                healths: Some(state.healths()),
                scores: Some(state.points()),
                finished_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    {
        warn!(match_id = %state.match_id, error = %e, "match outcome persistence failed");
    }

    // 2. snapshot pre-update ratings before mutating any stats
    let ranked = state.settings.mode.is_ranked() && winner.is_some() && loser.is_some();
    let pre_ratings = if ranked {
        match (
            ctx.store.get_stats(players[0]).await,
            ctx.store.get_stats(players[1]).await,
        ) {
            (Ok(a), Ok(b)) => Some([a.rating, b.rating]),
            (a, b) => {
                warn!(
                    match_id = %state.match_id,
                    "rating snapshot failed, skipping mmr update: {:?} {:?}",
                    a.err(),
                    b.err()
                );
                None
            }
        }
    } else {
        None
    };

    let deltas = match (pre_ratings, winner) {
        (Some(ratings), Some(winner_id)) => {
            let winner_slot = state.slot_of(winner_id).unwrap_or(0);
            let (dw, dl) = rating::match_deltas(
                ctx.config.rating_k,
                ratings[winner_slot],
                ratings[1 - winner_slot],
            );
            let mut by_slot = [0i32; 2];
            by_slot[winner_slot] = dw;
            by_slot[1 - winner_slot] = dl;
            Some(by_slot)
        }
        _ => None,
    };

    // 3. apply counter deltas; each player's rating change rides in the
    //    same atomic update
    let mut updated: [Option<UserStats>; 2] = [None, None];
    for (slot, user) in players.into_iter().enumerate() {
        let won = winner == Some(user);
        let answered = state
            .answers()
            .iter()
            .filter(|a| a.user_id == user)
            .count() as u32;

        let delta = StatsDelta {
            result: if won { MatchResult::Win } else { MatchResult::Loss },
            correct: state.players()[slot].correct_count,
            answered,
            xp: if won { WINNER_REWARDS.xp } else { LOSER_REWARDS.xp },
            coins: if won {
                WINNER_REWARDS.coins
            } else {
                LOSER_REWARDS.coins
            },
            rating_change: deltas.map(|d| d[slot]).unwrap_or(0),
        };

        match ctx.store.apply_stats_delta(user, delta).await {
            Ok(stats) => updated[slot] = Some(stats),
            Err(e) => {
                warn!(match_id = %state.match_id, %user, error = %e, "stats update failed");
            }
        }
    }

    // 4. ranked rating notifications, computed from the pre-snapshots
    if let (Some(pre), Some(deltas)) = (pre_ratings, deltas) {
        for (slot, user) in players.into_iter().enumerate() {
            let old = pre[slot];
            let new = updated[slot]
                .as_ref()
                .map(|s| s.rating)
                .unwrap_or_else(|| rating::apply_delta(old, deltas[slot]));
            let old_tier = TierInfo::for_rating(old);
            let new_tier = TierInfo::for_rating(new);

            ctx.router
                .send_to_user(
                    user,
                    ServerMessage::MmrChanged(MmrChangedPayload {
                        user_id: user,
                        old,
                        new,
                        change: new - old,
                        old_tier: old_tier.label(),
                        new_tier: new_tier.label(),
                        promoted: new_tier.tier > old_tier.tier,
                        demoted: new_tier.tier < old_tier.tier,
                    }),
                )
                .await;
        }
    }

    // 5. fire-and-forget hooks, strictly after the counter updates
    for (slot, user) in players.into_iter().enumerate() {
        let Some(stats) = updated[slot].clone() else {
            continue;
        };
        let event = MatchOutcomeEvent {
            match_id: state.match_id,
            user_id: user,
            won: winner == Some(user),
            correct: state.players()[slot].correct_count,
            total_questions: state.questions().len() as u32,
            stats,
        };
        spawn_hooks(ctx.clone(), event);
    }

    // 6. game over, exactly once per participant
    let rewards = players
        .into_iter()
        .map(|user| PlayerRewards {
            user_id: user,
            rewards: if winner == Some(user) {
                WINNER_REWARDS
            } else {
                LOSER_REWARDS
            },
        })
        .collect();

    let game_over = ServerMessage::GameOver(GameOverPayload {
        match_id: state.match_id,
        winner,
        loser,
        reason: end_reason,
        healths: state
            .players()
            .iter()
            .map(|p| PlayerHealth {
                user_id: p.user_id,
                health: p.health,
            })
            .collect(),
        rewards,
        game_history: state.answers().to_vec(),
    });
    ctx.router.broadcast_to_match(players, game_over).await;

    // 7. session cleanup
    for user in players {
        ctx.registry.set_current_match(user, None).await;
        ctx.registry.update_status(user, UserStatus::Online).await;
    }

    info!(
        match_id = %state.match_id,
        winner = ?winner,
        reason = ?state.end_reason,
        "match settled"
    );
}

fn spawn_hooks(ctx: AppContext, event: MatchOutcomeEvent) {
    tokio::spawn(async move {
        let user = event.user_id;

        let body = if event.won {
            format!("You won your match ({} correct answers)", event.correct)
        } else {
            format!("You lost your match ({} correct answers)", event.correct)
        };
        if let Err(e) = ctx
            .store
            .push_notification(NotificationRow {
                user_id: user,
                kind: "match_result".into(),
                body,
                created_at: Utc::now(),
            })
            .await
        {
            warn!(%user, error = %e, "notification hook failed");
        }

        if let Err(e) = ctx.store.record_achievement_event(event.clone()).await {
            warn!(%user, error = %e, "achievement hook failed");
        }
        if let Err(e) = ctx.store.record_mission_event(event).await {
            warn!(%user, error = %e, "mission hook failed");
        }
    });
}
