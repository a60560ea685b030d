//! # TANDEM Networking - Lockstep Session Layer
//!
//! UDP networking for games that keep every participant's simulation in
//! lockstep.
//!
//! ## Architecture
//!
//! - **Protocol**: fixed 20-byte header, integrity hash, typed payloads (10 KB cap)
//! - **Transport**: one UDP socket per agent, bounded queues, pumped once per tick
//! - **Dispatch**: message type to handler table, unknown types degrade to a warning
//! - **Rooms**: `NotRan → Waiting → InitialSync → Running → Ended`, fixed-tick game loop
//! - **Time sync**: buffered gameplay broadcast per game-time slice, desync detection
//!
//! ## Data Flow
//!
//! ```text
//!  datagram → agent (magic, bounds, hash) → dispatch → lobby / room / client session
//!                                                          │
//!  datagram ← agent (frame, hash) ← time-synced broadcast ◄┘
//! ```
//!
//! Nothing in this crate is fatal to the process: a bad datagram, an unknown
//! message type, a full queue or a desync costs one message or one log line.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem_networking::config::RoomConfig;
//! use tandem_networking::{DefaultRules, NetConfig, RoomRules, ServerHost};
//!
//! let rules = Arc::new(|room: &RoomConfig| Box::new(DefaultRules::relay(room)) as Box<dyn RoomRules>);
//! let server = Arc::new(ServerHost::start(NetConfig::default(), rules)?);
//! let pump = server.spawn()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;
pub mod timesync;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientEvent, ClientSession, GameClient};
pub use config::NetConfig;
pub use dispatch::{FunctionRegistry, NetworkFunction};
pub use error::{
    ConfigError, DesyncError, DispatchError, FrameError, FrameResult, NetResult, QueueFullError, SceneError,
    TransportError,
};
pub use protocol::{decode, encode, stable_hash, GameplayMessage, NetworkMessage, RoomDescription};
pub use room::{DefaultRules, NetworkScene, PlayerState, RelayScene, RoomRules, SceneFactory, ServerRoom};
pub use server::{Lobby, RulesFactory, ServerHost};
pub use timesync::{ClientGameClock, HashVerifier, TimeSyncedServerRoom};
pub use transport::{AgentMode, MessageSink, NetworkAgent, RecordingSink};
