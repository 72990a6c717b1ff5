//! Transfer buffer management.
//!
//! A full-duplex transfer uses one heap allocation as both the transmit
//! source and the receive destination. [`TransferBuffers`] hands out
//! those allocations and keeps allocation accounting so callers (and
//! tests) can check that every buffer is released exactly once.
//!
//! Ownership is the whole protocol: the dispatcher owns a buffer while
//! building a task, the worker thread owns it after a successful
//! hand-off, and the buffer's destructor is the only release point.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct BufferStats {
    /// Buffers ever acquired.
    total: AtomicUsize,
    /// Buffers released (dropped).
    released: AtomicUsize,
    /// Bytes currently held by live buffers.
    bytes_in_use: AtomicUsize,
}

/// Allocates transfer buffers and tracks their lifetime.
///
/// Cloning shares the accounting.
#[derive(Debug, Clone, Default)]
pub struct TransferBuffers {
    stats: Arc<BufferStats>,
}

impl TransferBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `bytes` into a fresh allocation sized to the payload.
    pub fn acquire(&self, bytes: &[u8]) -> TransferBuffer {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_in_use.fetch_add(bytes.len(), Ordering::Relaxed);
        TransferBuffer {
            data: bytes.to_vec().into_boxed_slice(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Number of buffers ever acquired.
    pub fn total(&self) -> usize {
        self.stats.total.load(Ordering::Acquire)
    }

    /// Number of buffers released.
    pub fn released(&self) -> usize {
        self.stats.released.load(Ordering::Acquire)
    }

    /// Number of buffers currently alive.
    pub fn in_use(&self) -> usize {
        self.total().saturating_sub(self.released())
    }

    /// Bytes held by live buffers.
    pub fn bytes_in_use(&self) -> usize {
        self.stats.bytes_in_use.load(Ordering::Acquire)
    }
}

/// One owned transfer allocation.
///
/// Not `Clone`: there is exactly one owner, and dropping it is the
/// release.
pub struct TransferBuffer {
    data: Box<[u8]>,
    stats: Arc<BufferStats>,
}

impl TransferBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pointer used for both `tx_buf` and `rx_buf` of a spidev transfer.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        self.stats.bytes_in_use.fetch_sub(self.data.len(), Ordering::Relaxed);
        self.stats.released.fetch_add(1, Ordering::Release);
    }
}
