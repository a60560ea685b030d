//! Fixed-capacity message queues.
//!
//! Slots are allocated once at construction and overwritten in place, so
//! queueing a message never allocates.

use std::net::SocketAddr;

use tandem_shared::MAX_MESSAGE_SIZE;

use crate::error::QueueFullError;
use crate::protocol::NetworkMessage;

/// A queued unit of outbound traffic.
#[derive(Clone, Debug)]
pub struct MessagePair {
    /// Where the message goes.
    pub recipient: SocketAddr,
    /// The message.
    pub message: NetworkMessage,
}

impl MessagePair {
    fn empty() -> Self {
        Self {
            recipient: SocketAddr::from(([0, 0, 0, 0], 0)),
            message: NetworkMessage::new(0u32),
        }
    }
}

/// A received datagram waiting for validation.
#[derive(Clone)]
pub struct InboundDatagram {
    /// Sender address.
    pub from: SocketAddr,
    len: usize,
    bytes: [u8; MAX_MESSAGE_SIZE],
    /// Set once the pump has handled this datagram.
    pub processed: bool,
}

impl InboundDatagram {
    fn empty() -> Self {
        Self {
            from: SocketAddr::from(([0, 0, 0, 0], 0)),
            len: 0,
            bytes: [0u8; MAX_MESSAGE_SIZE],
            processed: false,
        }
    }

    /// Stores a datagram. `data` must not exceed [`MAX_MESSAGE_SIZE`].
    pub fn fill(&mut self, from: SocketAddr, data: &[u8]) {
        let len = data.len().min(MAX_MESSAGE_SIZE);
        self.from = from;
        self.bytes[..len].copy_from_slice(&data[..len]);
        self.len = len;
        self.processed = false;
    }

    /// The received bytes.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Bounded array of reusable slots.
pub struct MessageQueue<T> {
    slots: Box<[T]>,
    len: usize,
}

impl<T> MessageQueue<T> {
    /// Creates a queue of `capacity` slots built by `make`.
    pub fn new(capacity: usize, make: impl Fn() -> T) -> Self {
        let slots: Vec<T> = (0..capacity).map(|_| make()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            len: 0,
        }
    }

    /// Fills the next free slot.
    ///
    /// # Errors
    ///
    /// [`QueueFullError`] if every slot is taken.
    pub fn push_with(&mut self, fill: impl FnOnce(&mut T)) -> Result<(), QueueFullError> {
        let capacity = self.slots.len();
        let slot = self.slots.get_mut(self.len).ok_or(QueueFullError { capacity })?;
        fill(slot);
        self.len += 1;
        Ok(())
    }

    /// Occupied slots.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is queued.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slot at `index`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.len {
            self.slots.get_mut(index)
        } else {
            None
        }
    }

    /// Occupied slots in queue order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots[..self.len].iter_mut()
    }

    /// Marks every slot free.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl MessageQueue<MessagePair> {
    /// Outbound queue with `capacity` slots.
    #[must_use]
    pub fn outbound(capacity: usize) -> Self {
        Self::new(capacity, MessagePair::empty)
    }
}

impl MessageQueue<InboundDatagram> {
    /// Inbound queue with `capacity` slots.
    #[must_use]
    pub fn inbound(capacity: usize) -> Self {
        Self::new(capacity, InboundDatagram::empty)
    }
}
