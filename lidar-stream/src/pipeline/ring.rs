//! Bounded circular buffer of work-unit handles
//!
//! Storage is a fixed array sized for the largest supported ring; the
//! configured capacity only limits how much of it is used. Nothing is
//! allocated after construction.

use crate::core::types::ChunkHandle;
use crate::error::{Error, Result};
use crate::pool::Handle;

/// Hard ceiling on ring capacity
pub const MAX_BUFFER_SIZE: usize = 100;

/// Smallest usable ring (one slot is always kept empty)
pub const MIN_BUFFER_SIZE: usize = 2;

/// Default ring capacity
pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// Single-producer single-consumer FIFO of chunk handles
pub struct ChunkRing {
    slots: [ChunkHandle; MAX_BUFFER_SIZE],
    capacity: usize,
    head: usize, // Write position (next empty slot)
    tail: usize, // Read position (oldest entry)
}

impl ChunkRing {
    pub fn new(capacity: usize) -> Result<Self> {
        let mut ring = Self {
            slots: [Handle::dangling(); MAX_BUFFER_SIZE],
            capacity: DEFAULT_BUFFER_SIZE,
            head: 0,
            tail: 0,
        };
        ring.resize(capacity)?;
        Ok(ring)
    }

    /// Change the capacity of an empty ring
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&capacity) {
            return Err(Error::InvalidBufferSize(capacity));
        }
        debug_assert!(self.is_empty());
        self.capacity = capacity;
        self.head = 0;
        self.tail = 0;
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued chunks
    #[inline]
    pub fn len(&self) -> usize {
        (self.head + self.capacity - self.tail) % self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Append at the write index
    ///
    /// Fails with `BufferOverflow` if advancing the write index would make
    /// it catch up with the read index. The chunk is not queued in that case.
    pub fn push(&mut self, chunk: ChunkHandle) -> Result<()> {
        let next = (self.head + 1) % self.capacity;
        if next == self.tail {
            return Err(Error::BufferOverflow {
                capacity: self.capacity,
            });
        }
        self.slots[self.head] = chunk;
        self.head = next;
        Ok(())
    }

    /// Remove the oldest chunk
    pub fn pop(&mut self) -> Option<ChunkHandle> {
        if self.is_empty() {
            return None;
        }
        let chunk = std::mem::replace(&mut self.slots[self.tail], Handle::dangling());
        self.tail = (self.tail + 1) % self.capacity;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: u32) -> ChunkHandle {
        Handle::from_raw_parts(i, 1)
    }

    #[test]
    fn test_fifo_order() {
        let mut ring = ChunkRing::new(8).unwrap();
        for i in 0..5 {
            ring.push(chunk(i)).unwrap();
        }
        assert_eq!(ring.len(), 5);
        for i in 0..5 {
            assert_eq!(ring.pop(), Some(chunk(i)));
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_overflow_reported() {
        let mut ring = ChunkRing::new(4).unwrap();
        for i in 0..3 {
            ring.push(chunk(i)).unwrap();
        }
        assert!(matches!(
            ring.push(chunk(3)),
            Err(Error::BufferOverflow { capacity: 4 })
        ));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = ChunkRing::new(3).unwrap();
        for round in 0..10u32 {
            ring.push(chunk(round * 2)).unwrap();
            ring.push(chunk(round * 2 + 1)).unwrap();
            assert_eq!(ring.pop(), Some(chunk(round * 2)));
            assert_eq!(ring.pop(), Some(chunk(round * 2 + 1)));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_size_limits() {
        assert!(ChunkRing::new(MAX_BUFFER_SIZE).is_ok());
        assert!(matches!(
            ChunkRing::new(MAX_BUFFER_SIZE + 1),
            Err(Error::InvalidBufferSize(101))
        ));
        assert!(ChunkRing::new(1).is_err());
    }
}
