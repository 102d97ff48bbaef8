// src/session/chunk_queue.rs
//! Bounded lock-free chunk queue
//!
//! Sits between the ingestion endpoint and the encoder writer task. Pushes
//! never block; when the queue is full the chunk is dropped and counted.
//! This is the bounded-resource policy: media bytes are never buffered
//! beyond the configured capacity.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free bounded queue of media chunks
pub struct ChunkQueue {
    queue: ArrayQueue<Bytes>,
    push_count: AtomicU64,
    pop_count: AtomicU64,
    drop_count: AtomicU64,
}

impl ChunkQueue {
    /// Create a queue holding at most `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Push a chunk (non-blocking). Returns the chunk back if the queue is full.
    pub fn push(&self, chunk: Bytes) -> Result<(), Bytes> {
        match self.queue.push(chunk) {
            Ok(()) => {
                self.push_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(chunk) => {
                self.drop_count.fetch_add(1, Ordering::Relaxed);
                Err(chunk)
            }
        }
    }

    /// Pop the oldest chunk, if any (non-blocking)
    pub fn try_pop(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(chunk) => {
                self.pop_count.fetch_add(1, Ordering::Relaxed);
                Some(chunk)
            }
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue statistics
    pub fn stats(&self) -> ChunkQueueStats {
        ChunkQueueStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }
}

/// Chunk queue statistics
#[derive(Debug, Clone)]
pub struct ChunkQueueStats {
    pub push_count: u64,
    pub pop_count: u64,
    pub drop_count: u64,
    pub current_size: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_ordering() {
        let queue = ChunkQueue::new(8);
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();

        assert_eq!(queue.try_pop().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(queue.try_pop().unwrap(), Bytes::from_static(b"b"));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_drop_on_full() {
        let queue = ChunkQueue::new(2);
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();

        let rejected = queue.push(Bytes::from_static(b"c"));
        assert!(rejected.is_err());

        let stats = queue.stats();
        assert_eq!(stats.push_count, 2);
        assert_eq!(stats.drop_count, 1);
        assert_eq!(stats.current_size, 2);
    }
}
