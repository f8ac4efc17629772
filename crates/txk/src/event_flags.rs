//! Event flag groups.
//!
//! A group is a 32-bit flag word plus a FIFO list of threads suspended on it.
//! `set` merges bits into the word and releases every waiter whose request is
//! now satisfied, oldest first. A waiter that asked for clearing has its bits
//! cleared before the next waiter is examined.
//!
//! Waiting follows the kernel's resumption model: a `get` that cannot be
//! satisfied suspends the calling thread and returns [`FlagError::WouldBlock`];
//! the thread reports [`ThreadAction::Blocked`](crate::ThreadAction::Blocked)
//! and, once resumed, calls `get` again to collect the delivered result.

use heapless::Vec as BoundedVec;
use log::{debug, warn};
use thiserror::Error;

use crate::scheduler::{Scheduler, WaitObject, MAX_THREADS};
use crate::sync::{Arc, Mutex};
use crate::thread::{BlockReason, ThreadContext, ThreadId};
use crate::trace::records::flags;
use crate::trace::TraceHook;

/// Errors returned by flag operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagError {
    /// The request was not satisfied before the wait option ran out.
    #[error("event flags not satisfied before timeout")]
    Timeout,
    /// The caller was suspended; resume it and call `get` again.
    #[error("caller suspended on event flags")]
    WouldBlock,
    /// A request mask of zero can never be satisfied.
    #[error("requested flag mask is empty")]
    InvalidMask,
}

/// How `set` merges its mask into the flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOption {
    /// `flags |= mask`
    Or,
    /// `flags &= mask`
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Any requested bit is enough.
    Or,
    /// All requested bits must be set.
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    Keep,
    /// Clear the requested bits on success.
    Clear,
}

/// Match and clear policy of a `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOption {
    pub mode: WaitMode,
    pub clear: ClearMode,
}

impl GetOption {
    pub const OR: Self = Self {
        mode: WaitMode::Or,
        clear: ClearMode::Keep,
    };
    pub const OR_CLEAR: Self = Self {
        mode: WaitMode::Or,
        clear: ClearMode::Clear,
    };
    pub const AND: Self = Self {
        mode: WaitMode::And,
        clear: ClearMode::Keep,
    };
    pub const AND_CLEAR: Self = Self {
        mode: WaitMode::And,
        clear: ClearMode::Clear,
    };

    fn matches(&self, flags: u32, requested: u32) -> bool {
        match self.mode {
            WaitMode::Or => flags & requested != 0,
            WaitMode::And => flags & requested == requested,
        }
    }
}

/// How long a `get` may suspend its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOption {
    NoWait,
    Ticks(u32),
    Forever,
}

/// Snapshot returned by [`EventFlagGroup::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagInfo {
    pub name: &'static str,
    pub flags: u32,
    pub suspended: usize,
}

#[derive(Debug, Clone, Copy)]
struct FlagWaiter {
    thread: ThreadId,
    requested: u32,
    option: GetOption,
}

#[derive(Default)]
struct FlagState {
    flags: u32,
    waiters: BoundedVec<FlagWaiter, MAX_THREADS>,
    delivered: BoundedVec<(ThreadId, Result<u32, FlagError>), MAX_THREADS>,
}

impl FlagState {
    /// Checks the flag word and applies the clear on success. Returns the
    /// word as it was before clearing.
    fn try_match(&mut self, requested: u32, option: GetOption) -> Option<u32> {
        if !option.matches(self.flags, requested) {
            return None;
        }
        let actual = self.flags;
        if option.clear == ClearMode::Clear {
            self.flags &= !requested;
        }
        Some(actual)
    }

    fn take_delivered(&mut self, thread: ThreadId) -> Option<Result<u32, FlagError>> {
        let index = self.delivered.iter().position(|(id, _)| *id == thread)?;
        Some(self.delivered.swap_remove(index).1)
    }

    fn deliver(&mut self, thread: ThreadId, result: Result<u32, FlagError>) {
        if self.delivered.push((thread, result)).is_err() {
            unreachable!("each thread holds at most one delivery");
        }
    }

    fn remove_waiter(&mut self, thread: ThreadId) -> bool {
        match self.waiters.iter().position(|w| w.thread == thread) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

struct FlagShared {
    name: &'static str,
    scheduler: Arc<Scheduler>,
    state: Mutex<FlagState>,
    trace: Option<TraceHook>,
}

impl FlagShared {
    fn emit(&self, record: u8, payload: &[u8]) {
        if let Some(ref trace) = self.trace {
            let _ = trace(record, payload, true);
        }
    }
}

impl WaitObject for FlagShared {
    fn expire(&self, thread: ThreadId) {
        let expired = {
            let mut state = self.state.lock();
            let removed = state.remove_waiter(thread);
            if removed {
                state.deliver(thread, Err(FlagError::Timeout));
            }
            removed
        };
        if expired {
            warn!("event flags '{}': wait of {thread:?} timed out", self.name);
            self.emit(flags::TIMEOUT, &[thread.0]);
            self.scheduler.wake(thread);
        }
    }
}

/// Handle to an event flag group. Clones share the same group.
#[derive(Clone)]
pub struct EventFlagGroup {
    inner: Arc<FlagShared>,
}

impl EventFlagGroup {
    pub(crate) fn new(
        name: &'static str,
        scheduler: Arc<Scheduler>,
        trace: Option<TraceHook>,
    ) -> Self {
        debug!("event flags '{name}': created");
        Self {
            inner: Arc::new(FlagShared {
                name,
                scheduler,
                state: Mutex::new(FlagState::default()),
                trace,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Merges `mask` into the flag word and releases satisfied waiters.
    ///
    /// Callable from any context, including outside threads.
    pub fn set(&self, mask: u32, option: SetOption) {
        let mut released: BoundedVec<(ThreadId, u32), MAX_THREADS> = BoundedVec::new();
        let word = {
            let mut state = self.inner.state.lock();
            match option {
                SetOption::Or => state.flags |= mask,
                SetOption::And => state.flags &= mask,
            }

            let mut index = 0;
            while index < state.waiters.len() {
                let waiter = state.waiters[index];
                match state.try_match(waiter.requested, waiter.option) {
                    Some(actual) => {
                        state.waiters.remove(index);
                        state.deliver(waiter.thread, Ok(actual));
                        if released.push((waiter.thread, actual)).is_err() {
                            unreachable!("released waiters are bounded by MAX_THREADS");
                        }
                    }
                    None => index += 1,
                }
            }
            state.flags
        };

        self.inner.emit(flags::SET, &word.to_le_bytes());
        for (thread, actual) in released {
            debug!(
                "event flags '{}': delivered {actual:#x} to {thread:?}",
                self.inner.name
            );
            self.emit_get(thread, actual);
            self.inner.scheduler.wake(thread);
        }
    }

    /// Waits for `requested` bits from inside a thread.
    ///
    /// Returns the flag word as it was when the request was satisfied. A
    /// [`FlagError::WouldBlock`] means the calling thread is now suspended.
    pub fn get(
        &self,
        ctx: &ThreadContext,
        requested: u32,
        option: GetOption,
        wait: WaitOption,
    ) -> Result<u32, FlagError> {
        if requested == 0 {
            return Err(FlagError::InvalidMask);
        }
        let thread = ctx.thread_id();

        let outcome = {
            let mut state = self.inner.state.lock();
            if let Some(result) = state.take_delivered(thread) {
                return result;
            }
            if let Some(actual) = state.try_match(requested, option) {
                Ok(actual)
            } else {
                let timeout = match wait {
                    WaitOption::NoWait | WaitOption::Ticks(0) => return Err(FlagError::Timeout),
                    WaitOption::Ticks(ticks) => Some(ticks),
                    WaitOption::Forever => None,
                };
                if state
                    .waiters
                    .push(FlagWaiter {
                        thread,
                        requested,
                        option,
                    })
                    .is_err()
                {
                    unreachable!("waiters are bounded by MAX_THREADS");
                }
                let object: Arc<dyn WaitObject> = self.inner.clone();
                self.inner
                    .scheduler
                    .block(thread, BlockReason::EventFlags, timeout, Some(object));
                Err(FlagError::WouldBlock)
            }
        };

        match outcome {
            Ok(actual) => self.emit_get(thread, actual),
            Err(_) => self.inner.emit(flags::SUSPEND, &[thread.0]),
        }
        outcome
    }

    /// Non-blocking get usable outside threads.
    pub fn try_get(&self, requested: u32, option: GetOption) -> Result<u32, FlagError> {
        if requested == 0 {
            return Err(FlagError::InvalidMask);
        }
        self.inner
            .state
            .lock()
            .try_match(requested, option)
            .ok_or(FlagError::Timeout)
    }

    pub fn info(&self) -> FlagInfo {
        let state = self.inner.state.lock();
        FlagInfo {
            name: self.inner.name,
            flags: state.flags,
            suspended: state.waiters.len(),
        }
    }

    fn emit_get(&self, thread: ThreadId, actual: u32) {
        let mut payload = [0u8; 5];
        payload[0] = thread.0;
        payload[1..].copy_from_slice(&actual.to_le_bytes());
        self.inner.emit(flags::GET, &payload);
    }
}

impl core::fmt::Debug for EventFlagGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let info = self.info();
        f.debug_struct("EventFlagGroup")
            .field("name", &info.name)
            .field("flags", &format_args!("{:#010x}", info.flags))
            .field("suspended", &info.suspended)
            .finish()
    }
}
