//! Thread definitions.
//!
//! A thread here is a *non-terminating task*: its entry is resumed by the
//! kernel once per dispatch, runs up to the next suspension point and reports
//! what it wants next as a [`ThreadAction`]. Leaving the loop is an explicit
//! [`ThreadAction::Terminated`], never a plain return.
//!
//! Every thread owns a stack [`Region`] carved from a byte pool. Priorities
//! follow the usual RTOS convention: numerically lower is more urgent.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use txmem::Region;

use crate::scheduler::Scheduler;
use crate::sync::Arc;

/// Smallest stack a thread can be created with.
pub const MINIMUM_STACK_SIZE: usize = 256;

/// Thread identifier, assigned by the kernel in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u8);

/// Thread priority; `ThreadPriority(0)` is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadPriority(pub u8);

/// Why a thread is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Timed sleep.
    Sleep,
    /// Waiting on an event flag group.
    EventFlags,
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created without auto-start; waits for `Kernel::resume`.
    Created,
    /// Thread is ready to run.
    Ready,
    /// Thread is currently executing.
    Running,
    /// Thread is suspended.
    Blocked(BlockReason),
    /// Thread left its loop; it is never scheduled again.
    Terminated,
}

/// Round-robin policy among threads of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeSlice {
    /// Run until blocking or being preempted by a more urgent thread.
    #[default]
    None,
    /// Rotate behind same-priority peers after this many ticks of running.
    Ticks(u32),
}

/// What a thread entry asks for after one resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    /// Still ready; resume again when scheduled.
    Continue,
    /// Suspend for at least this many ticks.
    Sleep(u32),
    /// A kernel object has already suspended the thread.
    Blocked,
    /// Give the CPU to ready threads of the same priority.
    Yield,
    /// Leave the loop for good.
    Terminated,
}

/// Thread entry: resumed repeatedly, never expected to return normally.
pub type ThreadEntry = Box<dyn FnMut(&mut ThreadContext) -> ThreadAction + Send>;

/// Per-resumption context handed to a thread entry.
pub struct ThreadContext {
    id: ThreadId,
    name: &'static str,
    priority: ThreadPriority,
    input: u64,
    iteration: u64,
    now: u64,
    scheduler: Arc<Scheduler>,
}

impl ThreadContext {
    pub(crate) fn new(
        control: &ThreadControl,
        iteration: u64,
        now: u64,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            id: control.id,
            name: control.name,
            priority: control.priority,
            input: control.input,
            iteration,
            now,
            scheduler,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> ThreadPriority {
        self.priority
    }

    /// The input value given at creation.
    pub fn input(&self) -> u64 {
        self.input
    }

    /// Number of earlier resumptions of this thread (0 on the first one).
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Kernel tick at which this resumption started.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

/// Configuration for creating a thread.
pub struct ThreadConfig {
    pub(crate) name: &'static str,
    pub(crate) entry: ThreadEntry,
    pub(crate) input: u64,
    pub(crate) stack: Option<(Region, usize)>,
    pub(crate) priority: ThreadPriority,
    pub(crate) preemption_threshold: ThreadPriority,
    pub(crate) time_slice: TimeSlice,
    pub(crate) auto_start: bool,
}

impl ThreadConfig {
    /// Creates a configuration with threshold equal to `priority`, no time
    /// slice and auto-start enabled. A stack must still be supplied.
    pub fn new(name: &'static str, priority: ThreadPriority, entry: ThreadEntry) -> Self {
        Self {
            name,
            entry,
            input: 0,
            stack: None,
            priority,
            preemption_threshold: priority,
            time_slice: TimeSlice::None,
            auto_start: true,
        }
    }

    /// Sets the value reported by [`ThreadContext::input`].
    pub fn with_input(mut self, input: u64) -> Self {
        self.input = input;
        self
    }

    /// Binds a stack region and the stack size the thread needs from it.
    pub fn with_stack(mut self, region: Region, stack_size: usize) -> Self {
        self.stack = Some((region, stack_size));
        self
    }

    /// Only threads more urgent than `threshold` may preempt this one.
    pub fn with_preemption_threshold(mut self, threshold: ThreadPriority) -> Self {
        self.preemption_threshold = threshold;
        self
    }

    pub fn with_time_slice(mut self, time_slice: TimeSlice) -> Self {
        self.time_slice = time_slice;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

impl fmt::Debug for ThreadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadConfig")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("preemption_threshold", &self.preemption_threshold)
            .field("time_slice", &self.time_slice)
            .field("auto_start", &self.auto_start)
            .field("stack", &self.stack)
            .finish()
    }
}

/// Static description of a created thread, shared between the kernel and
/// its handles.
pub(crate) struct ThreadControl {
    pub(crate) id: ThreadId,
    pub(crate) name: &'static str,
    pub(crate) priority: ThreadPriority,
    pub(crate) preemption_threshold: ThreadPriority,
    pub(crate) time_slice: TimeSlice,
    pub(crate) input: u64,
    pub(crate) stack_size: usize,
    pub(crate) stack: Region,
    pub(crate) run_count: AtomicU64,
}

/// Handle to a created thread.
#[derive(Clone)]
pub struct ThreadHandle {
    control: Arc<ThreadControl>,
    scheduler: Arc<Scheduler>,
}

impl ThreadHandle {
    pub(crate) fn new(control: Arc<ThreadControl>, scheduler: Arc<Scheduler>) -> Self {
        Self { control, scheduler }
    }

    pub fn id(&self) -> ThreadId {
        self.control.id
    }

    pub fn name(&self) -> &'static str {
        self.control.name
    }

    pub fn priority(&self) -> ThreadPriority {
        self.control.priority
    }

    pub fn preemption_threshold(&self) -> ThreadPriority {
        self.control.preemption_threshold
    }

    pub fn time_slice(&self) -> TimeSlice {
        self.control.time_slice
    }

    pub fn stack_size(&self) -> usize {
        self.control.stack_size
    }

    /// The stack region owned by the thread.
    pub fn stack(&self) -> &Region {
        &self.control.stack
    }

    /// Current scheduling state.
    pub fn state(&self) -> ThreadState {
        self.scheduler
            .state_of(self.control.id)
            .unwrap_or(ThreadState::Terminated)
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ThreadState::Terminated
    }

    /// How many times the entry has been resumed.
    pub fn run_count(&self) -> u64 {
        self.control.run_count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.control.id)
            .field("name", &self.control.name)
            .field("priority", &self.control.priority)
            .field("state", &self.state())
            .field("stack_size", &self.control.stack_size)
            .finish()
    }
}
