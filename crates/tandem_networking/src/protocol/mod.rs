//! # Protocol
//!
//! Message framing and payload layouts.
//!
//! - [`message`]: the framed [`NetworkMessage`] and its integrity hash
//! - [`serialization`]: content writer/reader
//! - [`payloads`]: per-type content layouts

pub mod message;
pub mod payloads;
pub mod serialization;

pub use message::{decode, encode, stable_hash, MessageContent, NetworkMessage};
pub use payloads::{GameplayMessage, RoomDescription};
pub use serialization::{ContentReader, ContentWriter};
