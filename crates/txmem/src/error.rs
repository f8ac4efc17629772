//! Errors reported by byte pools.

use thiserror::Error;

/// Errors that can occur while creating or allocating from a pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The backing storage cannot host the requested pool.
    #[error("pool resource error: {0}")]
    Resource(&'static str),
    /// No free block is large enough for the request.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    /// The request size is not allocatable.
    #[error("invalid allocation size: {0}")]
    InvalidSize(usize),
}
