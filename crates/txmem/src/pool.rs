//! First-fit byte pool.
//!
//! The pool keeps its free space as an address-ordered list of blocks.
//! Allocation takes the first block that is large enough and splits off the
//! front of it; releasing a region reinserts it and merges it with adjacent
//! free blocks, so `available` bytes stay contiguous wherever possible.

use core::cell::RefCell;
use core::fmt;
use core::ops::Range;
use std::sync::Arc;

use critical_section::Mutex;
use log::debug;

use crate::error::PoolError;
use crate::{align_up, PoolStats, MINIMUM_POOL_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    offset: usize,
    len: usize,
}

impl Block {
    fn end(&self) -> usize {
        self.offset + self.len
    }
}

struct PoolState {
    storage: Box<[u8]>,
    free: Vec<Block>,
    stats: PoolStats,
}

impl PoolState {
    fn take_first_fit(&mut self, len: usize) -> Option<usize> {
        let index = self.free.iter().position(|block| block.len >= len)?;
        let block = &mut self.free[index];
        let offset = block.offset;
        if block.len == len {
            self.free.remove(index);
        } else {
            block.offset += len;
            block.len -= len;
        }
        self.stats.on_alloc(len);
        Some(offset)
    }

    fn give_back(&mut self, offset: usize, len: usize) {
        let index = self.free.partition_point(|block| block.offset < offset);
        self.free.insert(index, Block { offset, len });

        if index + 1 < self.free.len() && self.free[index].end() == self.free[index + 1].offset {
            let next = self.free.remove(index + 1);
            self.free[index].len += next.len;
        }
        if index > 0 && self.free[index - 1].end() == self.free[index].offset {
            let current = self.free.remove(index);
            self.free[index - 1].len += current.len;
        }

        self.stats.on_release(len);
    }
}

struct PoolShared {
    name: &'static str,
    capacity: usize,
    state: Mutex<RefCell<PoolState>>,
}

impl PoolShared {
    fn release(&self, offset: usize, len: usize) {
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).give_back(offset, len);
        });
        debug!("pool '{}': released {len} bytes at {offset}", self.name);
    }
}

/// A named byte pool carved out of caller-provided storage.
///
/// Cloning the pool clones a handle; all clones share one arena.
#[derive(Clone)]
pub struct BytePool {
    shared: Arc<PoolShared>,
}

impl BytePool {
    /// Creates a pool managing the first `capacity` bytes of `storage`.
    ///
    /// The storage is moved into the pool, so one backing area can never
    /// serve two pools.
    pub fn create(
        name: &'static str,
        storage: impl Into<Box<[u8]>>,
        capacity: usize,
    ) -> Result<Self, PoolError> {
        let storage = storage.into();
        if storage.len() < capacity {
            return Err(PoolError::Resource("backing storage smaller than pool capacity"));
        }
        if capacity < MINIMUM_POOL_SIZE {
            return Err(PoolError::Resource("pool capacity below minimum pool size"));
        }

        let state = PoolState {
            storage,
            free: vec![Block {
                offset: 0,
                len: capacity,
            }],
            stats: PoolStats::new(capacity),
        };
        debug!("pool '{name}': created with {capacity} bytes");

        Ok(Self {
            shared: Arc::new(PoolShared {
                name,
                capacity,
                state: Mutex::new(RefCell::new(state)),
            }),
        })
    }

    /// Creates a pool over freshly zeroed storage of exactly `capacity` bytes.
    pub fn with_capacity(name: &'static str, capacity: usize) -> Result<Self, PoolError> {
        Self::create(name, vec![0u8; capacity], capacity)
    }

    /// Returns the pool name.
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Returns the number of bytes managed by the pool.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Allocates at least `size` bytes without waiting.
    ///
    /// The returned region is rounded up to [`crate::ALIGNMENT`]. Fails with
    /// [`PoolError::OutOfMemory`] when no free block can hold the request.
    pub fn allocate(&self, size: usize) -> Result<Region, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize(size));
        }

        let shared = &self.shared;
        let (offset, len) = critical_section::with(|cs| {
            let mut state = shared.state.borrow_ref_mut(cs);
            let available = state.stats.available;
            let out_of_memory = PoolError::OutOfMemory {
                requested: size,
                available,
            };
            let len = align_up(size).ok_or_else(|| out_of_memory.clone())?;
            let offset = state.take_first_fit(len).ok_or(out_of_memory)?;
            Ok::<_, PoolError>((offset, len))
        })?;

        debug!("pool '{}': allocated {len} bytes at {offset}", shared.name);
        Ok(Region {
            pool: Arc::clone(shared),
            offset,
            len,
        })
    }

    /// Returns a snapshot of the pool statistics.
    pub fn info(&self) -> PoolStats {
        critical_section::with(|cs| {
            let state = self.shared.state.borrow_ref(cs);
            let mut stats = state.stats;
            stats.fragments = state.free.len();
            stats
        })
    }
}

impl fmt::Debug for BytePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytePool")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

/// An exclusively owned byte range of a [`BytePool`].
///
/// Dropping the region returns its bytes to the pool.
pub struct Region {
    pool: Arc<PoolShared>,
    offset: usize,
    len: usize,
}

impl Region {
    /// Offset of the first byte within the pool arena.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Regions are never empty; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte range of the region within the pool arena.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Name of the pool the region came from.
    pub fn pool_name(&self) -> &'static str {
        self.pool.name
    }

    /// Runs `f` with mutable access to the region's bytes.
    ///
    /// The bytes are copied out of the arena and written back once `f`
    /// returns, so `f` runs without the pool lock and may use the pool.
    /// Writes are lost if `f` panics.
    pub fn with_bytes<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let range = self.range();
        let mut bytes = critical_section::with(|cs| {
            self.pool.state.borrow_ref(cs).storage[range.clone()].to_vec()
        });
        let result = f(&mut bytes);
        critical_section::with(|cs| {
            self.pool.state.borrow_ref_mut(cs).storage[range].copy_from_slice(&bytes);
        });
        result
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.pool.release(self.offset, self.len);
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("pool", &self.pool.name)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_splits_front_of_block() {
        let pool = BytePool::with_capacity("split", 256).unwrap();
        let a = pool.allocate(10).unwrap();
        let b = pool.allocate(16).unwrap();

        assert_eq!(a.range(), 0..16);
        assert_eq!(b.range(), 16..32);
        assert_eq!(pool.info().available, 224);
    }

    #[test]
    fn released_neighbours_coalesce() {
        let pool = BytePool::with_capacity("merge", 128).unwrap();
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();
        let c = pool.allocate(32).unwrap();

        drop(a);
        drop(c);
        assert_eq!(pool.info().fragments, 2);

        drop(b);
        let info = pool.info();
        assert_eq!(info.fragments, 1);
        assert_eq!(info.available, 128);
        assert!(info.is_empty());
    }

    #[test]
    fn region_bytes_are_writable() {
        let pool = BytePool::with_capacity("bytes", 128).unwrap();
        let mut region = pool.allocate(8).unwrap();
        region.with_bytes(|bytes| bytes.fill(0xEF));
        let sum: u32 = region.with_bytes(|bytes| bytes.iter().map(|b| *b as u32).sum());
        assert_eq!(sum, 0xEF * 8);
    }

    #[test]
    fn region_bytes_closure_can_use_the_pool() {
        let pool = BytePool::with_capacity("reentrant", 256).unwrap();
        let mut region = pool.allocate(16).unwrap();
        let mut other = pool.allocate(16).unwrap();
        let spare = pool.allocate(16).unwrap();

        let (inner, available) = region.with_bytes(|bytes| {
            bytes.fill(0x5A);
            other.with_bytes(|other| other.fill(0xA5));
            drop(spare);
            let inner = pool.allocate(8).unwrap();
            (inner, pool.info().available)
        });

        assert_eq!(inner.range(), 32..40);
        assert_eq!(available, 256 - 16 - 16 - 8);
        assert!(region.with_bytes(|bytes| bytes.iter().all(|b| *b == 0x5A)));
        assert!(other.with_bytes(|bytes| bytes.iter().all(|b| *b == 0xA5)));
    }
}
