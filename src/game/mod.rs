//! Game Logic Module
//!
//! The authoritative match machinery.
//!
//! ## Module Structure
//!
//! - `state`: the pure per-match state machine (health, answers, winner)
//! - `engine`: one actor task per match, timers and fan-out
//! - `rating`: Elo update and tier derivation for ranked play
//! - `settlement`: the post-match pipeline (counters, rewards, hooks)

pub mod engine;
pub mod rating;
pub mod settlement;
pub mod state;

// Re-export key types
pub use engine::{MatchCommand, MatchHandle, MatchTable};
pub use rating::{Tier, TierInfo};
pub use state::{EndReason, MatchMode, MatchSettings, MatchState, MatchStatus};
