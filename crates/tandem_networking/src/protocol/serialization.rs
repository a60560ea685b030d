//! # Content Serialization
//!
//! Little-endian writer and reader over a message's fixed content buffer.
//!
//! ## Design
//!
//! - Writes go straight into the message's inline buffer (no heap)
//! - Writers return `false` when the buffer is full and leave it unchanged
//! - Readers return `None` past the end and never panic
//! - Strings are an `i32` byte count followed by UTF-8

use bytemuck::{bytes_of, Pod};
use tandem_shared::MAX_CONTENT_SIZE;

/// Writes values at the end of a content buffer.
pub struct ContentWriter<'a> {
    buffer: &'a mut [u8; MAX_CONTENT_SIZE],
    position: &'a mut usize,
}

impl<'a> ContentWriter<'a> {
    /// Creates a writer that appends after `position`.
    pub(crate) fn new(buffer: &'a mut [u8; MAX_CONTENT_SIZE], position: &'a mut usize) -> Self {
        Self { buffer, position }
    }

    /// Bytes written so far, including anything written before this writer.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        *self.position
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self.position == 0
    }

    /// Free space left in the buffer.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        MAX_CONTENT_SIZE - *self.position
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.remaining() {
            return false;
        }
        let start = *self.position;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        *self.position += bytes.len();
        true
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write_bytes(&[value])
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes an i32 in little-endian format.
    #[inline]
    pub fn write_i32(&mut self, value: i32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a Pod type directly.
    ///
    /// Pod payloads are laid out in native byte order; every supported
    /// target is little-endian.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) -> bool {
        self.write_bytes(bytes_of(value))
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> bool {
        let Ok(len) = i32::try_from(value.len()) else {
            return false;
        };
        if value.len() + 4 > self.remaining() {
            return false;
        }
        self.write_i32(len) && self.write_bytes(value.as_bytes())
    }
}

/// Reads values from a content slice.
pub struct ContentReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ContentReader<'a> {
    /// Creates a reader at the start of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Reads `len` raw bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Some(slice)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads an i32 in little-endian format.
    #[inline]
    pub fn read_i32(&mut self) -> Option<i32> {
        let bytes = self.read_bytes(4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a Pod type directly.
    #[inline]
    pub fn read_pod<T: Pod>(&mut self) -> Option<T> {
        let bytes = self.read_bytes(std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Option<&'a str> {
        let len = usize::try_from(self.read_i32()?).ok()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).ok()
    }
}
