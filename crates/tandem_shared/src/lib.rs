//! # TANDEM Shared
//!
//! Types that every participant of a lockstep session agrees on.
//!
//! ## Contents
//!
//! - [`constants`]: wire limits and protocol defaults
//! - [`protocol`]: message type tags, room/game states and fixed-layout payloads
//! - [`handle`]: actor identities (`"Server"` or a generated player id)
//!
//! This crate carries no I/O. Framing, hashing and transport live in
//! `tandem_networking`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod handle;
pub mod protocol;

pub use constants::{
    DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, GAME_TIME_ADVANCE_PER_TICK, MAX_CONTENT_SIZE,
    MAX_MESSAGE_SIZE, PROTOCOL_MAGIC, SIZE_WITHOUT_CONTENT,
};
pub use handle::{NetworkActorHandle, PlayerId};
pub use protocol::{
    DenyReason, GameState, MessageType, RoomSummary, TimeSyncHashPayload, USER_MESSAGE_TYPE_START,
};
