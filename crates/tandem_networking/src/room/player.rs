//! Room roster entries.

use std::net::SocketAddr;

use tandem_shared::{NetworkActorHandle, PlayerId};

/// Progress of one player through a room's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayerState {
    /// Admitted; loading its scene.
    Joined,
    /// Scene loaded.
    Initialized,
    /// Initial sync applied.
    Ready,
    /// Game running.
    Playing,
    /// Left or lost. Kept in the roster, skipped by broadcasts.
    Disconnected,
}

/// One player in a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomPlayer {
    /// Player id.
    pub id: PlayerId,
    /// Identity handle derived from the id.
    pub handle: NetworkActorHandle,
    /// Where to send this player's messages.
    pub addr: SocketAddr,
    /// Lifecycle progress.
    pub state: PlayerState,
}

impl RoomPlayer {
    /// A freshly admitted player.
    #[must_use]
    pub fn joined(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            handle: NetworkActorHandle::player(id),
            addr,
            state: PlayerState::Joined,
        }
    }

    /// Returns true unless the player disconnected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state != PlayerState::Disconnected
    }
}
