//! Actor identities.
//!
//! Every participant is named by a [`NetworkActorHandle`]. The server is
//! always `"Server"`; players get a generated numeric id at connect time.
//! Handles compare by their id string and never change after creation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::SERVER_ACTOR_ID;

/// Numeric player id handed out by the server on connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Id that is never handed out.
    pub const NULL: Self = Self(0);

    /// Returns true if this is a real id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a network actor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkActorHandle {
    id: String,
}

impl NetworkActorHandle {
    /// The server's handle.
    #[must_use]
    pub fn server() -> Self {
        Self {
            id: SERVER_ACTOR_ID.to_owned(),
        }
    }

    /// Handle of a player.
    #[must_use]
    pub fn player(id: PlayerId) -> Self {
        Self { id: id.to_string() }
    }

    /// The id string.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true for the server's handle.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.id == SERVER_ACTOR_ID
    }

    /// Numeric player id, if this handle names a player.
    #[must_use]
    pub fn player_id(&self) -> Option<PlayerId> {
        self.id.parse().ok().map(PlayerId)
    }
}

impl From<PlayerId> for NetworkActorHandle {
    fn from(id: PlayerId) -> Self {
        Self::player(id)
    }
}

impl fmt::Display for NetworkActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_compare_by_id() {
        assert_eq!(NetworkActorHandle::player(PlayerId(7)), NetworkActorHandle::player(PlayerId(7)));
        assert_ne!(NetworkActorHandle::player(PlayerId(7)), NetworkActorHandle::player(PlayerId(8)));
        assert_ne!(NetworkActorHandle::server(), NetworkActorHandle::player(PlayerId(1)));
    }

    #[test]
    fn test_player_id_round_trips_through_handle() {
        let handle = NetworkActorHandle::from(PlayerId(42));
        assert_eq!(handle.id(), "42");
        assert_eq!(handle.player_id(), Some(PlayerId(42)));
        assert!(!handle.is_server());
        assert_eq!(NetworkActorHandle::server().player_id(), None);
    }
}
