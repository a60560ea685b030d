//! # Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! [transport]
//! queue_capacity = 1000
//!
//! [room]
//! max_players = 4
//! time_synced = true
//!
//! [time_sync]
//! advance_per_tick = 20
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_shared::constants::MAX_LISTED_ROOMS;
use tandem_shared::{DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, GAME_TIME_ADVANCE_PER_TICK};

use crate::error::ConfigError;

/// Transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Slots in each of the send and receive queues.
    pub queue_capacity: usize,
    /// Longest the pump thread sleeps without traffic, in milliseconds.
    pub idle_wait_ms: u64,
    /// Drop messages whose index is older than the newest seen from that peer.
    pub discard_stale: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_wait_ms: 1000,
            discard_stale: true,
        }
    }
}

impl TransportConfig {
    /// Idle wait as a duration.
    #[must_use]
    pub const fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Room settings used by the lobby and the default room rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Roster limit.
    pub max_players: usize,
    /// Players needed before the game starts.
    pub min_players: usize,
    /// Rooms returned by one listing.
    pub max_rooms: usize,
    /// Attach time-synced broadcast to new rooms.
    pub time_synced: bool,
    /// Interval of the running game loop, in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 8,
            min_players: 2,
            max_rooms: MAX_LISTED_ROOMS,
            time_synced: true,
            tick_interval_ms: 50,
        }
    }
}

impl RoomConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Time-synced broadcast settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// Game-time units per slice.
    pub advance_per_tick: u32,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            advance_per_tick: GAME_TIME_ADVANCE_PER_TICK,
        }
    }
}

/// Server process settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Complete networking configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Transport settings.
    pub transport: TransportConfig,
    /// Room settings.
    pub room: RoomConfig,
    /// Time sync settings.
    pub time_sync: TimeSyncConfig,
    /// Server settings.
    pub server: ServerConfig,
}

impl NetConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for bad TOML, [`ConfigError::Invalid`] for bad values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.queue_capacity == 0 {
            return Err(ConfigError::Invalid("transport.queue_capacity must be positive".into()));
        }
        if self.room.max_players == 0 {
            return Err(ConfigError::Invalid("room.max_players must be positive".into()));
        }
        if self.room.min_players > self.room.max_players {
            return Err(ConfigError::Invalid(format!(
                "room.min_players ({}) exceeds room.max_players ({})",
                self.room.min_players, self.room.max_players
            )));
        }
        if self.room.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("room.tick_interval_ms must be positive".into()));
        }
        if self.time_sync.advance_per_tick == 0 {
            return Err(ConfigError::Invalid("time_sync.advance_per_tick must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = NetConfig::from_toml_str("").unwrap();
        assert_eq!(config, NetConfig::default());
        assert_eq!(config.transport.queue_capacity, 1000);
        assert_eq!(config.time_sync.advance_per_tick, 20);
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_partial_sections_override() {
        let config = NetConfig::from_toml_str(
            r"
            [room]
            max_players = 3
            time_synced = false

            [server]
            port = 7100
            ",
        )
        .unwrap();
        assert_eq!(config.room.max_players, 3);
        assert!(!config.room.time_synced);
        assert_eq!(config.room.min_players, 2);
        assert_eq!(config.server.port, 7100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let error = NetConfig::from_toml_str("[room]\nmax_players = 1\nmin_players = 2\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
        let error = NetConfig::from_toml_str("[transport]\nqueue_capacity = 0\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(matches!(
            NetConfig::from_toml_str("[room\nmax_players = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
