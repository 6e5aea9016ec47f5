//! # Leaf Queues
//!
//! Every leaf class owns one queue. The scheduler only needs to know whether
//! the queue holds anything and how long its head packet is; the drop policy
//! is the queue's business.

use std::collections::VecDeque;

use bytes::Bytes;

/// Per-leaf packet queue.
pub trait LeafQueue {
    /// Add a packet. `false` means the queue refused it.
    fn push(&mut self, packet: Bytes) -> bool;

    fn pop(&mut self) -> Option<Bytes>;

    /// Length of the head packet in bytes.
    fn peek_len(&self) -> Option<usize>;

    fn is_empty(&self) -> bool {
        self.peek_len().is_none()
    }

    /// Packets held.
    fn len(&self) -> usize;

    /// Discard everything; returns the bytes discarded.
    fn purge(&mut self) -> usize;

    /// Drop one packet to relieve pressure; returns its length. Queues with
    /// no drop policy return `None`.
    fn drop_tail(&mut self) -> Option<usize> {
        None
    }
}

/// Packet limit used when a hierarchy does not name one.
pub const DEFAULT_QUEUE_LIMIT: usize = 1_000;

/// Tail-drop FIFO with a packet limit.
#[derive(Debug, Clone)]
pub struct FifoQueue {
    packets: VecDeque<Bytes>,
    limit: usize,
    /// Bytes currently held.
    bytes: usize,
}

impl FifoQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            limit,
            bytes: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}

impl LeafQueue for FifoQueue {
    fn push(&mut self, packet: Bytes) -> bool {
        if self.packets.len() >= self.limit {
            return false;
        }
        self.bytes += packet.len();
        self.packets.push_back(packet);
        true
    }

    fn pop(&mut self) -> Option<Bytes> {
        let packet = self.packets.pop_front()?;
        self.bytes -= packet.len();
        Some(packet)
    }

    fn peek_len(&self) -> Option<usize> {
        self.packets.front().map(Bytes::len)
    }

    fn len(&self) -> usize {
        self.packets.len()
    }

    fn purge(&mut self) -> usize {
        self.packets.clear();
        std::mem::take(&mut self.bytes)
    }

    fn drop_tail(&mut self) -> Option<usize> {
        let packet = self.packets.pop_back()?;
        self.bytes -= packet.len();
        Some(packet.len())
    }
}
