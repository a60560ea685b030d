//! Message vocabulary shared between client and server.
//!
//! Tags are `u32` on the wire. Values below [`USER_MESSAGE_TYPE_START`] are
//! reserved for the networking layer; gameplay code may register handlers for
//! anything at or above it.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// First message type available to gameplay code.
pub const USER_MESSAGE_TYPE_START: u32 = 1000;

/// Message type tag.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Client asks to be assigned a player id.
    RequestConnect = 1,
    /// Server assigned a player id.
    Connected = 2,
    /// The sender address is already connected.
    ErrorAlreadyConnected = 3,
    /// Client creates a room and becomes its host.
    HostRoom = 4,
    /// Client asks for the room list.
    GetRooms = 5,
    /// Server answers with the room list.
    RoomList = 6,
    /// Client asks about its current room.
    GetRoomInfo = 7,
    /// Server describes one room.
    RoomInfo = 8,
    /// Someone else joined the receiver's room.
    PlayerJoinedRoom = 10,
    /// Client leaves its room.
    LeaveRoom = 11,
    /// The request needs a room and the sender has none.
    ErrorNotInRoom = 12,
    /// The requested room does not exist.
    ErrorRoomNotFound = 13,

    /// Client asks to join a game room.
    JoinGameRequest = 20,
    /// Join refused.
    JoinGameDenied = 21,
    /// Join accepted; carries the room and tells the client to load its scene.
    JoinGameSuccess = 22,
    /// Client finished loading its scene.
    ClientSceneReady = 23,
    /// Full scene state sent before the game starts.
    GameInitialSync = 24,
    /// Client applied the initial sync.
    GameInitialSyncReady = 25,
    /// Every player is ready; the game is running.
    GameStart = 26,
    /// Per-tick scene state.
    GameSync = 27,

    /// Gameplay message forwarded to the other members of a room.
    GenericGameplay = 40,
    /// Gameplay message stamped with the game time it applies at.
    GenericGameplayWithTime = 41,
    /// Clients may advance their game time up to the carried value.
    AdvanceTime = 42,
    /// Client state hash for one time slice.
    TimeSyncHash = 43,
    /// Client state hash with a textual state dump for diagnosing desyncs.
    TimeSyncHashDebug = 44,
}

impl MessageType {
    /// Every tag the networking layer knows about.
    pub const ALL: [Self; 25] = [
        Self::RequestConnect,
        Self::Connected,
        Self::ErrorAlreadyConnected,
        Self::HostRoom,
        Self::GetRooms,
        Self::RoomList,
        Self::GetRoomInfo,
        Self::RoomInfo,
        Self::PlayerJoinedRoom,
        Self::LeaveRoom,
        Self::ErrorNotInRoom,
        Self::ErrorRoomNotFound,
        Self::JoinGameRequest,
        Self::JoinGameDenied,
        Self::JoinGameSuccess,
        Self::ClientSceneReady,
        Self::GameInitialSync,
        Self::GameInitialSyncReady,
        Self::GameStart,
        Self::GameSync,
        Self::GenericGameplay,
        Self::GenericGameplayWithTime,
        Self::AdvanceTime,
        Self::TimeSyncHash,
        Self::TimeSyncHashDebug,
    ];

    /// Wire value of this tag.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parses a wire value. Unknown values (including gameplay types) yield `None`.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_u32() == value)
    }

    /// Hash reports that feed desync detection instead of the gameplay buffer.
    #[inline]
    #[must_use]
    pub const fn is_time_sync_hash(self) -> bool {
        matches!(self, Self::TimeSyncHash | Self::TimeSyncHashDebug)
    }
}

impl From<MessageType> for u32 {
    fn from(value: MessageType) -> Self {
        value.as_u32()
    }
}

/// Lifecycle of a game room.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameState {
    /// Created but not opened.
    #[default]
    NotRan = 0,
    /// Accepting players.
    Waiting = 1,
    /// Initial scene state sent, waiting for every player to apply it.
    InitialSync = 2,
    /// Ticking.
    Running = 3,
    /// Terminal.
    Ended = 4,
}

impl GameState {
    /// Parses a wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::NotRan),
            1 => Some(Self::Waiting),
            2 => Some(Self::InitialSync),
            3 => Some(Self::Running),
            4 => Some(Self::Ended),
            _ => None,
        }
    }
}

/// Why a join was refused.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    /// The room's rules refused the player.
    Refused = 1,
    /// The player is already in the room.
    AlreadyJoined = 2,
    /// The room is no longer accepting players.
    NotWaiting = 3,
}

impl DenyReason {
    /// Parses a wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Refused),
            2 => Some(Self::AlreadyJoined),
            3 => Some(Self::NotWaiting),
            _ => None,
        }
    }
}

/// Fixed-layout room description used by `RoomInfo`, `JoinGameSuccess` and `RoomList`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Room id.
    pub room_id: u32,
    /// Player id of the host.
    pub host_id: u32,
    /// Players in the roster, disconnected ones included.
    pub player_count: u32,
    /// Roster limit.
    pub max_players: u32,
    /// [`GameState`] wire value.
    pub game_state: u32,
}

impl RoomSummary {
    /// Decoded game state, if the wire value is known.
    #[must_use]
    pub const fn state(&self) -> Option<GameState> {
        GameState::from_u32(self.game_state)
    }
}

/// Payload of `TimeSyncHash` and the fixed prefix of `TimeSyncHashDebug`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct TimeSyncHashPayload {
    /// Game time the hash was taken at.
    pub time: i32,
    /// Simulation state hash.
    pub hash: i32,
}
