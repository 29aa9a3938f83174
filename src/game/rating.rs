//! Rating
//!
//! Elo-style rating update for ranked matches and the tier/division bands
//! derived from a rating. Pure functions; settlement applies the results.

use serde::{Deserialize, Serialize};

/// Expected score of `own` against `opponent`:
/// `1 / (1 + 10^((R_opp - R_own) / 400))`.
pub fn expected_score(own: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - own) / 400.0))
}

/// Rating change for an outcome: `round(K * (S - E))` with `S` 1.0 for a
/// win and 0.0 for a loss.
pub fn rating_change(k: i32, score: f64, expected: f64) -> i32 {
    (f64::from(k) * (score - expected)).round() as i32
}

/// Winner/loser deltas for one ranked match, computed against each side's
/// pre-match snapshot of the opponent's rating.
pub fn match_deltas(k: i32, winner_rating: i32, loser_rating: i32) -> (i32, i32) {
    let winner_delta = rating_change(k, 1.0, expected_score(winner_rating, loser_rating));
    let loser_delta = rating_change(k, 0.0, expected_score(loser_rating, winner_rating));
    (winner_delta, loser_delta)
}

/// Apply a delta, clamping the result at zero.
pub fn apply_delta(rating: i32, delta: i32) -> i32 {
    (rating + delta).max(0)
}

/// Named rating bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Below 1000.
    Bronze,
    /// 1000..1500.
    Silver,
    /// 1500..2000.
    Gold,
    /// 2000..2500.
    Platinum,
    /// 2500..3000.
    Diamond,
    /// 3000..3500.
    Master,
    /// 3500 and up. No divisions.
    Grandmaster,
}

impl Tier {
    /// Band name as shown to players.
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Bronze => "Bronze",
            Tier::Silver => "Silver",
            Tier::Gold => "Gold",
            Tier::Platinum => "Platinum",
            Tier::Diamond => "Diamond",
            Tier::Master => "Master",
            Tier::Grandmaster => "Grandmaster",
        }
    }

    fn floor(&self) -> i32 {
        match self {
            Tier::Bronze => 0,
            Tier::Silver => 1000,
            Tier::Gold => 1500,
            Tier::Platinum => 2000,
            Tier::Diamond => 2500,
            Tier::Master => 3000,
            Tier::Grandmaster => 3500,
        }
    }

    fn width(&self) -> i32 {
        match self {
            Tier::Bronze => 1000,
            _ => 500,
        }
    }
}

/// A tier with its division (1 is highest, 4 lowest within the band).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    /// Band.
    pub tier: Tier,
    /// Division within the band, 1..=4. Always 1 for Grandmaster.
    pub division: u8,
}

impl TierInfo {
    /// Derive the band and division for a rating.
    pub fn for_rating(rating: i32) -> Self {
        let tier = match rating {
            r if r < 1000 => Tier::Bronze,
            r if r < 1500 => Tier::Silver,
            r if r < 2000 => Tier::Gold,
            r if r < 2500 => Tier::Platinum,
            r if r < 3000 => Tier::Diamond,
            r if r < 3500 => Tier::Master,
            _ => Tier::Grandmaster,
        };

        if tier == Tier::Grandmaster {
            return Self { tier, division: 1 };
        }

        // divisions carve each band into four equal steps, counting down
        // from 4 at the floor to 1 just under the next band
        let offset = (rating - tier.floor()).clamp(0, tier.width() - 1);
        let division = 4 - (offset / (tier.width() / 4)) as u8;
        Self { tier, division }
    }

    /// "Gold 2"-style label.
    pub fn label(&self) -> String {
        if self.tier == Tier::Grandmaster {
            self.tier.name().to_string()
        } else {
            format!("{} {}", self.tier.name(), self.division)
        }
    }
}
