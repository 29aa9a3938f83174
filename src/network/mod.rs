//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication: the wire
//! protocol, JWT authentication, the session registry, outbound fan-out,
//! and the accept/dispatch loops. Game rules live in `game/`.

pub mod auth;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage, UserStatus};
pub use router::Router;
pub use server::{GameServer, GameServerError};
pub use session::{Session, SessionRegistry};
