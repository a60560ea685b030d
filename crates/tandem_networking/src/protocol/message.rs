//! # Network Message
//!
//! One datagram on the wire:
//!
//! ```text
//! 0        4        8        12       16       20
//! +--------+--------+--------+--------+--------+----------------------+
//! | magic  |  hash  | index  |  type  | length | content (length B)   |
//! |  u32   |  i32   |  i32   |  u32   |  i32   |                      |
//! +--------+--------+--------+--------+--------+----------------------+
//! ```
//!
//! All fields are little-endian. `hash` covers the whole message with the
//! hash field itself zeroed. Decoding checks magic, then bounds, then hash,
//! and stops at the first failure.

use std::fmt;
use std::hash::Hasher;

use bytemuck::Pod;
use siphasher::sip::SipHasher24;
use tandem_shared::{MessageType, MAX_CONTENT_SIZE, MAX_MESSAGE_SIZE, PROTOCOL_MAGIC, SIZE_WITHOUT_CONTENT};

use super::serialization::{ContentReader, ContentWriter};
use crate::error::{FrameError, FrameResult};

/// Fixed keys so every peer computes the same hash.
const HASH_KEY_0: u64 = 0x7461_6E64_656D_0001;
const HASH_KEY_1: u64 = 0x6C6F_636B_7374_6570;

const HASH_OFFSET: usize = 4;

/// Stable non-cryptographic hash of `bytes`, folded to 32 bits.
#[must_use]
pub fn stable_hash(bytes: &[u8]) -> i32 {
    let mut hasher = SipHasher24::new_with_keys(HASH_KEY_0, HASH_KEY_1);
    hasher.write(bytes);
    fold(hasher.finish())
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn fold(hash: u64) -> i32 {
    (hash ^ (hash >> 32)) as u32 as i32
}

/// Hash of a frame whose header is given with the hash field already zeroed.
fn frame_hash(header: &[u8; SIZE_WITHOUT_CONTENT], content: &[u8]) -> i32 {
    let mut hasher = SipHasher24::new_with_keys(HASH_KEY_0, HASH_KEY_1);
    hasher.write(header);
    hasher.write(content);
    fold(hasher.finish())
}

/// Bounds-checked inline content region.
#[derive(Clone)]
pub struct MessageContent {
    len: usize,
    bytes: [u8; MAX_CONTENT_SIZE],
}

impl MessageContent {
    /// Empty content.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            bytes: [0u8; MAX_CONTENT_SIZE],
        }
    }

    /// The written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of written bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clears the content without touching the buffer.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn set(&mut self, bytes: &[u8]) -> FrameResult<()> {
        if bytes.len() > MAX_CONTENT_SIZE {
            return Err(FrameError::ContentTooLarge {
                declared: bytes.len() as i64,
                max: MAX_CONTENT_SIZE,
            });
        }
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for MessageContent {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for MessageContent {}

/// A single protocol message.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    /// Protocol magic; always [`PROTOCOL_MAGIC`] for valid messages.
    pub magic: u32,
    /// Hash of the framed message, set by framing and checked by decoding.
    pub hash: i32,
    /// Per-recipient sequence number, stamped by the transport.
    pub index: i32,
    message_type: u32,
    content: MessageContent,
}

impl NetworkMessage {
    /// Creates an empty message of the given type.
    #[must_use]
    pub fn new(message_type: impl Into<u32>) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            hash: 0,
            index: 0,
            message_type: message_type.into(),
            content: MessageContent::new(),
        }
    }

    /// Creates a message carrying `content`.
    ///
    /// # Errors
    ///
    /// [`FrameError::ContentTooLarge`] if `content` exceeds [`MAX_CONTENT_SIZE`].
    pub fn with_content(message_type: impl Into<u32>, content: &[u8]) -> FrameResult<Self> {
        let mut message = Self::new(message_type);
        message.content.set(content)?;
        Ok(message)
    }

    /// Creates a message carrying one Pod value.
    #[must_use]
    pub fn with_pod<T: Pod>(message_type: impl Into<u32>, value: &T) -> Self {
        let mut message = Self::new(message_type);
        // Every payload struct is far below MAX_CONTENT_SIZE.
        let _ = message.writer().write_pod(value);
        message
    }

    /// Raw type tag.
    #[inline]
    #[must_use]
    pub const fn message_type(&self) -> u32 {
        self.message_type
    }

    /// Known type tag, if any.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u32(self.message_type)
    }

    /// The content bytes.
    #[inline]
    #[must_use]
    pub fn content(&self) -> &[u8] {
        self.content.as_slice()
    }

    /// Size of the message once framed.
    #[inline]
    #[must_use]
    pub const fn framed_len(&self) -> usize {
        SIZE_WITHOUT_CONTENT + self.content.len()
    }

    /// Appends to the content.
    pub fn writer(&mut self) -> ContentWriter<'_> {
        ContentWriter::new(&mut self.content.bytes, &mut self.content.len)
    }

    /// Reads the content from the start.
    #[must_use]
    pub fn reader(&self) -> ContentReader<'_> {
        ContentReader::new(self.content.as_slice())
    }

    /// Frames the message into `out`, storing the computed hash in `self.hash`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// [`FrameError::Truncated`] if `out` is smaller than [`Self::framed_len`].
    pub fn encode_into(&mut self, out: &mut [u8]) -> FrameResult<usize> {
        let total = self.framed_len();
        if out.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: out.len(),
            });
        }

        let mut header = [0u8; SIZE_WITHOUT_CONTENT];
        header[0..4].copy_from_slice(&self.magic.to_le_bytes());
        header[8..12].copy_from_slice(&self.index.to_le_bytes());
        header[12..16].copy_from_slice(&self.message_type.to_le_bytes());
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let content_len = self.content.len() as i32;
        header[16..20].copy_from_slice(&content_len.to_le_bytes());

        self.hash = frame_hash(&header, self.content());
        header[HASH_OFFSET..HASH_OFFSET + 4].copy_from_slice(&self.hash.to_le_bytes());

        out[..SIZE_WITHOUT_CONTENT].copy_from_slice(&header);
        out[SIZE_WITHOUT_CONTENT..total].copy_from_slice(self.content());
        Ok(total)
    }

    /// Frames the message into a new buffer.
    ///
    /// # Errors
    ///
    /// Never fails for a message built through this type's constructors.
    pub fn to_bytes(&mut self) -> FrameResult<Vec<u8>> {
        let mut out = vec![0u8; self.framed_len()];
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Validates and decodes a datagram.
    ///
    /// Bytes past the declared content length are ignored.
    ///
    /// # Errors
    ///
    /// The first failing check of magic, bounds and hash, in that order.
    pub fn decode(bytes: &[u8]) -> FrameResult<Self> {
        if bytes.len() < 4 {
            return Err(FrameError::Truncated {
                needed: SIZE_WITHOUT_CONTENT,
                available: bytes.len(),
            });
        }
        let magic = read_u32(bytes, 0);
        if magic != PROTOCOL_MAGIC {
            return Err(FrameError::InvalidMagic { found: magic });
        }
        if bytes.len() < SIZE_WITHOUT_CONTENT {
            return Err(FrameError::Truncated {
                needed: SIZE_WITHOUT_CONTENT,
                available: bytes.len(),
            });
        }

        let declared = read_i32(bytes, 16);
        let content_len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= MAX_CONTENT_SIZE && SIZE_WITHOUT_CONTENT + len <= MAX_MESSAGE_SIZE)
            .ok_or(FrameError::ContentTooLarge {
                declared: i64::from(declared),
                max: MAX_CONTENT_SIZE,
            })?;
        let total = SIZE_WITHOUT_CONTENT + content_len;
        if bytes.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: bytes.len(),
            });
        }

        let transmitted = read_i32(bytes, HASH_OFFSET);
        let mut header = [0u8; SIZE_WITHOUT_CONTENT];
        header.copy_from_slice(&bytes[..SIZE_WITHOUT_CONTENT]);
        header[HASH_OFFSET..HASH_OFFSET + 4].fill(0);
        let content = &bytes[SIZE_WITHOUT_CONTENT..total];
        let computed = frame_hash(&header, content);
        if computed != transmitted {
            return Err(FrameError::HashMismatch {
                expected: transmitted,
                computed,
            });
        }

        let mut message = Self::new(read_u32(bytes, 12));
        message.hash = transmitted;
        message.index = read_i32(bytes, 8);
        message.content.set(content)?;
        Ok(message)
    }
}

impl fmt::Debug for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMessage")
            .field("hash", &self.hash)
            .field("index", &self.index)
            .field("type", &self.kind().map_or_else(|| self.message_type.to_string(), |k| format!("{k:?}")))
            .field("content_len", &self.content.len())
            .finish()
    }
}

/// Frames a fresh message of `message_type` carrying `payload`.
///
/// # Errors
///
/// [`FrameError::ContentTooLarge`] if the payload does not fit.
pub fn encode(message_type: impl Into<u32>, payload: &[u8]) -> FrameResult<Vec<u8>> {
    NetworkMessage::with_content(message_type, payload)?.to_bytes()
}

/// Decodes a datagram into its type tag and payload.
///
/// # Errors
///
/// See [`NetworkMessage::decode`].
pub fn decode(bytes: &[u8]) -> FrameResult<NetworkMessage> {
    NetworkMessage::decode(bytes)
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
