//! Size-segregated pools of send buffers.
//!
//! Every outgoing report is framed into a buffer rented from the pool matching
//! its report kind. Buffers are allocated lazily the first time a pool runs
//! dry and are handed back when the [`PooledBuffer`] is dropped.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::frame::ReportKind;

/// A pool of equally sized buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffer_length: usize,
    max_retained: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    /// Creates an empty pool of buffers with `buffer_length` bytes.
    ///
    /// At most `max_retained` returned buffers are kept for reuse, anything
    /// beyond that is deallocated.
    pub fn new(buffer_length: usize, max_retained: usize) -> Self {
        Self {
            buffer_length,
            max_retained,
            free: Mutex::new(Vec::new()),
        }
    }

    /// The length of every buffer in the pool.
    pub fn buffer_length(&self) -> usize {
        self.buffer_length
    }

    /// The amount of buffers currently waiting to be reused.
    pub fn retained(&self) -> usize {
        self.free.lock().len()
    }

    /// Rents a zeroed buffer from the pool.
    pub fn rent(self: &Arc<Self>) -> PooledBuffer {
        let buf = match self.free.lock().pop() {
            Some(mut buf) => {
                buf.fill(0);
                buf
            },
            None => vec![0u8; self.buffer_length].into_boxed_slice(),
        };

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, buf: Box<[u8]>) {
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }
}

/// A buffer rented from a [`BufferPool`].
///
/// Dereferences to the full buffer and returns it to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

/// One pool per report kind.
#[derive(Debug)]
pub struct BufferPools {
    short: Arc<BufferPool>,
    long: Arc<BufferPool>,
    very_long: Arc<BufferPool>,
}

impl Default for BufferPools {
    fn default() -> Self {
        Self {
            short: Arc::new(BufferPool::new(ReportKind::Short.frame_length(), 80)),
            long: Arc::new(BufferPool::new(ReportKind::Long.frame_length(), 40)),
            very_long: Arc::new(BufferPool::new(ReportKind::VeryLong.frame_length(), 20)),
        }
    }
}

impl BufferPools {
    /// Returns the pool for reports of the given kind.
    pub fn get(&self, kind: ReportKind) -> &Arc<BufferPool> {
        match kind {
            ReportKind::Short => &self.short,
            ReportKind::Long => &self.long,
            ReportKind::VeryLong => &self.very_long,
        }
    }

    /// Rents a zeroed buffer sized for a report of the given kind.
    pub fn rent(&self, kind: ReportKind) -> PooledBuffer {
        self.get(kind).rent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_sized_per_report_kind() {
        let pools = BufferPools::default();

        for kind in ReportKind::ALL {
            assert_eq!(pools.rent(kind).len(), kind.frame_length());
        }
    }

    #[test]
    fn returned_buffers_are_reused_zeroed() {
        let pool = Arc::new(BufferPool::new(7, 2));

        let mut buf = pool.rent();
        buf.copy_from_slice(&[0x10, 1, 2, 3, 4, 5, 6]);
        drop(buf);
        assert_eq!(pool.retained(), 1);

        let buf = pool.rent();
        assert_eq!(pool.retained(), 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn pool_retains_at_most_its_capacity() {
        let pool = Arc::new(BufferPool::new(20, 1));

        let a = pool.rent();
        let b = pool.rent();
        drop(a);
        drop(b);

        assert_eq!(pool.retained(), 1);
    }
}
