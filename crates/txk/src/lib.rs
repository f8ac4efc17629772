//! # txk
//!
//! A small priority-preemptive thread kernel with event flag groups.
//! Threads are non-terminating tasks resumed by the kernel one step at a
//! time; each step ends at a suspension point reported as a
//! [`ThreadAction`]. Stacks are regions of a `txmem` byte pool.
//!
//! ## Module Overview
//! - [`thread`]      - thread configuration, handles and resumption context
//! - [`scheduler`]   - ready lists, preemption threshold, tick clock
//! - [`event_flags`] - 32-bit event flag groups with FIFO waiters
//! - [`kernel`]      - thread registry and dispatch loop
//! - [`trace`]       - optional trace hook and record identifiers

pub mod event_flags;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod thread;
pub mod trace;

pub use event_flags::{
    ClearMode, EventFlagGroup, FlagError, FlagInfo, GetOption, SetOption, WaitMode, WaitOption,
};
pub use kernel::{ConfigError, Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder, KernelError};
pub use scheduler::{ScheduleDecision, Scheduler, WaitObject, MAX_PRIORITIES, MAX_THREADS};
pub use thread::{
    BlockReason, ThreadAction, ThreadConfig, ThreadContext, ThreadEntry, ThreadHandle, ThreadId,
    ThreadPriority, ThreadState, TimeSlice, MINIMUM_STACK_SIZE,
};
pub use trace::{TraceError, TraceHook, TraceResult};
