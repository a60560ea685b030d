//! # Rooms
//!
//! Server-side game sessions: roster, lifecycle, scene and game loop.

pub mod lifecycle;
pub mod player;
pub mod scene;
pub mod tick;

pub use lifecycle::ServerRoom;
pub use player::{PlayerState, RoomPlayer};
pub use scene::{DefaultRules, NetworkScene, RelayScene, RoomRules, SceneFactory};
pub use tick::{spawn_game_loop, TickLoop, TickStats};
