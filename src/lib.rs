//! # Quiz Battle Server
//!
//! Authoritative real-time server for head-to-head quiz battles.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   QUIZ BATTLE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── ids.rs      - Uuid-backed entity identifiers            │
//! │  └── timer.rs    - Cancellable one-shot timers               │
//! │                                                              │
//! │  store/          - Durable world (pure I/O, no game rules)   │
//! │  ├── mod.rs      - Store trait: users, stats, questions,     │
//! │  │                 matches, answers, lobbies, social hooks   │
//! │  └── memory.rs   - In-memory implementation                  │
//! │                                                              │
//! │  game/           - Authoritative match machinery             │
//! │  ├── state.rs    - Pure state machine: health, answers       │
//! │  ├── engine.rs   - Actor per match, deadlines, fan-out       │
//! │  ├── rating.rs   - Elo + tier bands (ranked)                 │
//! │  └── settlement.rs - Post-match counters, rewards, hooks     │
//! │                                                              │
//! │  matchmaking.rs  - Queue, pairing, two-phase confirmation    │
//! │  lobby.rs        - Code-addressed private rooms              │
//! │                                                              │
//! │  network/        - WebSocket edge                            │
//! │  ├── protocol.rs - {type, payload} JSON envelopes            │
//! │  ├── auth.rs     - JWT validation                            │
//! │  ├── session.rs  - Session registry, duplicate eviction      │
//! │  ├── router.rs   - Fan-out (session/user/match/lobby/friends)│
//! │  └── server.rs   - Accept loop, reader + single writer       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! Each socket owns one reader task and one writer task; every outbound
//! byte flows through the writer's channel, so per-client ordering is a
//! structural guarantee. The registry, queue, and lobby map are guarded by
//! their own locks. Per-match state is owned by a single actor task and
//! mutated only through its command channel, so answer evaluation, damage,
//! timeouts, and the terminal transition are serialised per match.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod core;
pub mod game;
pub mod lobby;
pub mod matchmaking;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::ServerConfig;
pub use context::AppContext;
pub use core::ids::{LobbyId, MatchId, SessionId, UserId};
pub use game::state::{MatchMode, MatchSettings, MatchState, MatchStatus};
pub use network::server::{GameServer, GameServerError};
pub use store::{MemoryStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
