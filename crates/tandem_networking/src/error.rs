//! # Networking Error Types
//!
//! Every failure in this layer is local to one message or one room. Nothing
//! here is fatal: callers log the error and carry on with the next message.

use thiserror::Error;

/// A datagram that failed validation or a payload that failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Leading four bytes are not the protocol magic.
    #[error("invalid magic: 0x{found:08X}")]
    InvalidMagic {
        /// Value found on the wire.
        found: u32,
    },

    /// Declared content length exceeds what a message may carry.
    #[error("content too large: declared {declared}, max {max}")]
    ContentTooLarge {
        /// Declared content length.
        declared: i64,
        /// Largest allowed content length.
        max: usize,
    },

    /// Fewer bytes arrived than the header requires.
    #[error("truncated message: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Recomputed hash differs from the transmitted one.
    #[error("hash mismatch: transmitted {expected}, computed {computed}")]
    HashMismatch {
        /// Hash carried by the message.
        expected: i32,
        /// Hash recomputed by the receiver.
        computed: i32,
    },

    /// Content does not match the layout its message type requires.
    #[error("malformed payload: {0}")]
    PayloadMalformed(&'static str),
}

/// A message that could not be handed to gameplay or lifecycle code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is registered for the type.
    #[error("no handler registered for message type {0}")]
    UnknownType(u32),

    /// The handler ran and reported a failure.
    #[error("handler for message type {message_type} failed: {reason}")]
    HandlerFailed {
        /// Type of the message being handled.
        message_type: u32,
        /// Handler-supplied reason.
        reason: String,
    },

    /// The handler could not parse the payload.
    #[error("bad payload: {0}")]
    Payload(#[from] FrameError),
}

/// A transport queue had no free slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue full ({capacity} slots)")]
pub struct QueueFullError {
    /// Capacity of the saturated queue.
    pub capacity: usize,
}

/// A message that could not be handed to the socket.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Send queue saturated; the message was dropped.
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    /// Framed message would exceed the maximum message size.
    #[error("message too large: {size} bytes, max {max}")]
    MessageTooLarge {
        /// Framed size.
        size: usize,
        /// Largest allowed size.
        max: usize,
    },

    /// Message could not be built.
    #[error("message could not be framed: {0}")]
    Frame(#[from] FrameError),

    /// Socket could not be created or configured.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Participants reported different state hashes for one time slice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("desync at game time {time}: hashes {hashes:?}")]
pub struct DesyncError {
    /// Game time of the slice.
    pub time: i32,
    /// Reported hashes in arrival order.
    pub hashes: Vec<i32>,
}

/// A scene collaborator could not build or apply state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// State text could not be applied.
    #[error("invalid scene state: {0}")]
    InvalidState(String),

    /// No scene is loaded yet.
    #[error("no scene loaded")]
    NotLoaded,
}

/// Configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for [`crate::config::NetConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for framing operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Result type for transport operations.
pub type NetResult<T> = Result<T, TransportError>;
