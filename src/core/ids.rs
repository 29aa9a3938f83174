//! Identifier Types
//!
//! Uuid-backed newtypes for the four entity kinds the server tracks.
//! Separate types keep a session id from ever being passed where a user id
//! is expected; all of them serialize as plain uuid strings on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing uuid.
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Parse from a uuid string.
            pub fn parse_str(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            /// The underlying uuid.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// Unique user identifier, stable across connections.
    UserId
);

define_id!(
    /// Identifier of one live socket session.
    SessionId
);

define_id!(
    /// Identifier of a match from pairing to settlement.
    MatchId
);

define_id!(
    /// Identifier of a private lobby (the wire-facing handle is the 6-char code).
    LobbyId
);

impl UserId {
    /// Derive a deterministic user id from raw bytes (used by auth to map
    /// token subjects onto stable ids).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}
