//! # txmem - Byte pools
//!
//! Deterministic memory for a small real-time kernel. A [`BytePool`] owns a
//! fixed arena and hands out exclusively owned [`Region`]s using first-fit
//! over an address-ordered free list. Allocation never blocks.
//!
//! ## Module Overview
//! - [`pool`]  - the byte pool and its regions
//! - [`error`] - allocation and configuration errors

pub mod error;
pub mod pool;

pub use error::PoolError;
pub use pool::{BytePool, Region};

/// Every region length is rounded up to a multiple of this many bytes.
pub const ALIGNMENT: usize = 8;

/// Smallest arena a pool can be created over.
pub const MINIMUM_POOL_SIZE: usize = 100;

/// Byte pool statistics for debugging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total bytes managed by the pool
    pub capacity: usize,
    /// Bytes currently free
    pub available: usize,
    /// Number of free blocks the available bytes are split into
    pub fragments: usize,
    /// Number of regions currently handed out
    pub allocations: usize,
    /// Lowest `available` value ever reached
    pub min_available: usize,
}

impl PoolStats {
    /// Create statistics for an untouched pool
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: capacity,
            fragments: 1,
            allocations: 0,
            min_available: capacity,
        }
    }

    /// Update statistics after handing out `bytes`
    pub fn on_alloc(&mut self, bytes: usize) {
        self.allocations += 1;
        self.available -= bytes;
        if self.available < self.min_available {
            self.min_available = self.available;
        }
    }

    /// Update statistics after `bytes` came back
    pub fn on_release(&mut self, bytes: usize) {
        if self.allocations > 0 {
            self.allocations -= 1;
            self.available += bytes;
        }
    }

    /// Check if every byte is handed out
    pub const fn is_exhausted(&self) -> bool {
        self.available == 0
    }

    /// Check if nothing is handed out
    pub const fn is_empty(&self) -> bool {
        self.allocations == 0
    }

    /// Get utilization as a percentage (0-100)
    pub fn utilization(&self) -> u8 {
        if self.capacity == 0 {
            0
        } else {
            (((self.capacity - self.available) * 100) / self.capacity) as u8
        }
    }
}

/// Round `size` up to the next multiple of [`ALIGNMENT`].
pub(crate) fn align_up(size: usize) -> Option<usize> {
    size.checked_add(ALIGNMENT - 1).map(|s| s & !(ALIGNMENT - 1))
}
