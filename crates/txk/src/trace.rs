//! Trace hook and record identifiers.
//!
//! Kernel objects report scheduling and synchronization activity through an
//! optional [`TraceHook`]. A record is an identifier from [`records`], a small
//! byte payload and a flag telling the sink whether to timestamp it.

use std::io;

use thiserror::Error;

use crate::sync::Arc;

/// Errors a trace sink may report back to the kernel.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

pub type TraceResult = Result<(), TraceError>;

/// Callback receiving `(record, payload, with_timestamp)`.
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Record identifiers emitted by the kernel.
pub mod records {
    /// Scheduler decisions.
    pub mod sched {
        /// A thread was dispatched: `[thread, priority]`.
        pub const NEXT: u8 = 52;
        /// Nothing is ready.
        pub const IDLE: u8 = 53;
        /// A running thread was preempted: `[preempted, by]`.
        pub const PREEMPT: u8 = 54;
        /// The tick counter advanced: little-endian `u64` tick.
        pub const TICK: u8 = 55;
    }

    /// Thread lifecycle.
    pub mod thread {
        /// Thread registered: `[thread, priority, threshold]`.
        pub const CREATE: u8 = 60;
        /// Thread made ready for the first time: `[thread]`.
        pub const RESUME: u8 = 61;
        /// Thread suspended on a timer or object: `[thread, reason]`.
        pub const BLOCK: u8 = 62;
        /// Suspended thread made ready again: `[thread]`.
        pub const WAKE: u8 = 63;
        /// Thread moved behind its same-priority peers: `[thread]`.
        pub const YIELD: u8 = 64;
        /// Thread reached its terminal state: `[thread]`.
        pub const TERMINATE: u8 = 65;
    }

    /// Event flag group activity.
    pub mod flags {
        /// Flags merged: little-endian `u32` flag word after the merge.
        pub const SET: u8 = 70;
        /// A get was satisfied: `[thread]` + little-endian `u32` actual flags.
        pub const GET: u8 = 71;
        /// A get suspended its caller: `[thread]`.
        pub const SUSPEND: u8 = 72;
        /// A suspended get timed out: `[thread]`.
        pub const TIMEOUT: u8 = 73;
    }
}
