//! Protocol constants shared by client and server.
//!
//! Changing any wire value here breaks compatibility with running peers.

/// Magic number leading every message: ASCII `"EMON"` packed big-endian.
pub const PROTOCOL_MAGIC: u32 = u32::from_be_bytes(*b"EMON");

/// Largest datagram either side will send or accept (10 KB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024;

/// Header size: magic, hash, index, type and content length, 4 bytes each.
pub const SIZE_WITHOUT_CONTENT: usize = 20;

/// Largest content region a single message can carry.
pub const MAX_CONTENT_SIZE: usize = MAX_MESSAGE_SIZE - SIZE_WITHOUT_CONTENT;

/// Default UDP port of a server.
pub const DEFAULT_PORT: u16 = 1337;

/// Default capacity of each transport queue (send and receive).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Game-time units a time-synced room advances per slice.
pub const GAME_TIME_ADVANCE_PER_TICK: u32 = 20;

/// Upper bound on rooms returned by a single room listing.
pub const MAX_LISTED_ROOMS: usize = 10;

/// Identity string of the server actor.
pub const SERVER_ACTOR_ID: &str = "Server";
