//! Core primitives: identifiers and the timer service.
//!
//! Everything time-bounded in the server (confirmation deadlines, question
//! deadlines, start delays, post-match cleanup) is scheduled through
//! [`timer`], so cancellation semantics live in exactly one place.

pub mod ids;
pub mod timer;

// Re-export core types
pub use ids::{LobbyId, MatchId, SessionId, UserId};
pub use timer::{schedule, TimerHandle};
