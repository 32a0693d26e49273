//! Process-wide pool of body capture buffers

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Capacity of freshly allocated buffers
pub const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;

/// Buffers that grew beyond this are dropped instead of pooled
pub const MAX_POOLED_CAPACITY: usize = 1024 * 1024;

/// Maximum number of idle buffers kept around
const MAX_IDLE_BUFFERS: usize = 256;

static GLOBAL_POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

/// Pool of reusable byte buffers
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    initial_capacity: usize,
    max_capacity: usize,
}

impl BufferPool {
    /// Create a pool with the default capacities
    pub fn new() -> Self {
        Self::with_capacities(INITIAL_BUFFER_CAPACITY, MAX_POOLED_CAPACITY)
    }

    /// Create a pool with custom capacities
    pub fn with_capacities(initial_capacity: usize, max_capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            initial_capacity,
            max_capacity,
        }
    }

    /// The process-wide pool
    pub fn global() -> &'static BufferPool {
        &GLOBAL_POOL
    }

    /// Take a cleared buffer out of the pool, allocating if none is idle
    pub fn acquire(&'static self) -> PooledBuffer {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity));
        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    /// Number of idle buffers
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_capacity {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle_count())
            .field("initial_capacity", &self.initial_capacity)
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

/// Buffer on loan from a [`BufferPool`]; returned on drop
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: &'static BufferPool,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().map_or(&EMPTY, |b| b)
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

static EMPTY: Vec<u8> = Vec::new();

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaked_pool(initial: usize, max: usize) -> &'static BufferPool {
        Box::leak(Box::new(BufferPool::with_capacities(initial, max)))
    }

    #[test]
    fn test_buffer_returned_on_drop() {
        let pool = leaked_pool(16, 1024);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"hello");
            assert_eq!(&buf[..], b"hello");
        }
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_oversized_buffer_discarded() {
        let pool = leaked_pool(16, 64);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(&[0u8; 128]);
        }
        assert_eq!(pool.idle_count(), 0);
    }
}
