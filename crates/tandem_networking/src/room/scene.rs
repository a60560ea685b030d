//! Collaborators a room consults: admission and start rules, and the scene.
//!
//! Neither the networking layer nor the room knows what a scene contains.
//! It only advances it, serializes it to text and applies text to it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_shared::NetworkActorHandle;

use super::player::RoomPlayer;
use crate::config::RoomConfig;
use crate::error::SceneError;

/// Simulation state shared through the room.
pub trait NetworkScene: Send {
    /// Advances the simulation by `dt` (server side).
    fn update(&mut self, dt: Duration);

    /// Serializes the full state.
    fn write_state(&self) -> String;

    /// Replaces local state with a serialized one (client side).
    ///
    /// # Errors
    ///
    /// [`SceneError::InvalidState`] if `state` cannot be applied.
    fn apply_state(&mut self, state: &str) -> Result<(), SceneError>;

    /// Marks the scene as running or stopped.
    fn set_running(&mut self, _running: bool) {}
}

/// Builds fresh scene instances.
pub type SceneFactory = Box<dyn Fn() -> Box<dyn NetworkScene> + Send + Sync>;

/// Room-specific rules.
pub trait RoomRules: Send {
    /// Whether `candidate` may join a room with this roster.
    fn can_add_player(&mut self, roster: &[RoomPlayer], candidate: &NetworkActorHandle) -> bool;

    /// Whether the game should leave `Waiting` once every player is initialized.
    fn game_should_start(&mut self, roster: &[RoomPlayer]) -> bool;

    /// A fresh scene for the initial sync.
    fn new_scene(&mut self) -> Box<dyn NetworkScene>;

    /// Interval of the running game loop.
    fn time_between_ticks(&self) -> Duration;

    /// Roster limit reported to clients.
    fn max_players(&self) -> usize;
}

/// Capacity-based rules: admit up to `max_players`, start at `min_players`.
pub struct DefaultRules {
    max_players: usize,
    min_players: usize,
    tick_interval: Duration,
    scenes: SceneFactory,
}

impl DefaultRules {
    /// Rules from config, building scenes with `scenes`.
    #[must_use]
    pub fn new(config: &RoomConfig, scenes: SceneFactory) -> Self {
        Self {
            max_players: config.max_players,
            min_players: config.min_players,
            tick_interval: config.tick_interval(),
            scenes,
        }
    }

    /// Rules from config, building [`RelayScene`]s.
    #[must_use]
    pub fn relay(config: &RoomConfig) -> Self {
        Self::new(config, Box::new(|| Box::new(RelayScene::default())))
    }
}

impl RoomRules for DefaultRules {
    fn can_add_player(&mut self, roster: &[RoomPlayer], _candidate: &NetworkActorHandle) -> bool {
        roster.len() < self.max_players
    }

    fn game_should_start(&mut self, roster: &[RoomPlayer]) -> bool {
        roster.iter().filter(|p| p.is_connected()).count() >= self.min_players
    }

    fn new_scene(&mut self) -> Box<dyn NetworkScene> {
        (self.scenes)()
    }

    fn time_between_ticks(&self) -> Duration {
        self.tick_interval
    }

    fn max_players(&self) -> usize {
        self.max_players
    }
}

/// Scene for servers that only relay gameplay: it counts ticks and elapsed time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayScene {
    /// Ticks advanced.
    pub tick: u64,
    /// Simulated milliseconds.
    pub elapsed_ms: u64,
    /// Whether the game is running.
    #[serde(skip)]
    pub running: bool,
}

impl NetworkScene for RelayScene {
    fn update(&mut self, dt: Duration) {
        self.tick += 1;
        self.elapsed_ms += u64::try_from(dt.as_millis()).unwrap_or(u64::MAX);
    }

    fn write_state(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn apply_state(&mut self, state: &str) -> Result<(), SceneError> {
        let parsed: Self = serde_json::from_str(state).map_err(|e| SceneError::InvalidState(e.to_string()))?;
        self.tick = parsed.tick;
        self.elapsed_ms = parsed.elapsed_ms;
        Ok(())
    }

    fn set_running(&mut self, running: bool) {
        self.running = running;
    }
}
