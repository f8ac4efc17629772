//! Priority-preemptive scheduler.
//!
//! ## Scheduling Policy
//!
//! 1. Numerically lower priority values are more urgent.
//! 2. Ready threads wait in one FIFO list per priority; a 32-bit ready map
//!    gives the most urgent non-empty list in constant time.
//! 3. The running thread stays at the head of its list. It keeps the CPU
//!    until it suspends, yields, exhausts its time slice, or a ready thread
//!    more urgent than its *preemption threshold* shows up.
//! 4. A preempted thread keeps its place at the head of its list.
//! 5. Sleeps and timed waits live in a deadline-ordered timer list that
//!    [`Scheduler::tick`] drains.

use std::collections::BTreeMap;

use heapless::Vec as BoundedVec;
use log::{debug, info, warn};

use crate::sync::{Arc, Mutex};
use crate::thread::{BlockReason, ThreadAction, ThreadId, ThreadPriority, ThreadState, TimeSlice};
use crate::trace::records::{sched, thread as thread_rec};
use crate::trace::TraceHook;

/// Number of distinct priority levels.
pub const MAX_PRIORITIES: usize = 32;

/// Upper bound on threads a kernel can hold.
pub const MAX_THREADS: usize = 32;

/// A kernel object a thread can be suspended on with a deadline.
pub trait WaitObject: Send + Sync {
    /// Called when `thread`'s deadline passes. The object must drop the
    /// thread from its wait list (if still there) and wake it.
    fn expire(&self, thread: ThreadId);
}

/// Scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Resume this thread.
    Thread { id: ThreadId, priority: ThreadPriority },
    /// No thread is ready.
    Idle,
}

/// 32-bit bitmap of priorities with at least one ready thread.
///
/// Priority 0 is bit 0, so `trailing_zeros` yields the most urgent level.
#[derive(Default, Clone, Copy)]
struct ReadyMap {
    bits: u32,
}

impl ReadyMap {
    fn insert(&mut self, prio: u8) {
        Self::assert_range(prio);
        self.bits |= 1u32 << prio;
    }

    fn remove(&mut self, prio: u8) {
        Self::assert_range(prio);
        self.bits &= !(1u32 << prio);
    }

    fn contains(&self, prio: u8) -> bool {
        (prio as usize) < MAX_PRIORITIES && (self.bits & (1u32 << prio)) != 0
    }

    fn highest(&self) -> Option<u8> {
        if self.bits == 0 {
            None
        } else {
            Some(self.bits.trailing_zeros() as u8)
        }
    }

    fn assert_range(prio: u8) {
        assert!(
            (prio as usize) < MAX_PRIORITIES,
            "priority {prio} exceeds supported range 0..31"
        );
    }
}

struct Tcb {
    name: &'static str,
    priority: u8,
    threshold: u8,
    time_slice: TimeSlice,
    slice_left: u32,
    state: ThreadState,
}

impl Tcb {
    fn reload_slice(&mut self) {
        if let TimeSlice::Ticks(ticks) = self.time_slice {
            self.slice_left = ticks;
        }
    }
}

struct Timer {
    deadline: u64,
    thread: ThreadId,
    object: Option<Arc<dyn WaitObject>>,
}

type Notes = Vec<(u8, Vec<u8>)>;

struct State {
    tick: u64,
    threads: BTreeMap<ThreadId, Tcb>,
    ready: [BoundedVec<ThreadId, MAX_THREADS>; MAX_PRIORITIES],
    ready_map: ReadyMap,
    running: Option<ThreadId>,
    timers: BoundedVec<Timer, MAX_THREADS>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            tick: 0,
            threads: BTreeMap::new(),
            ready: core::array::from_fn(|_| BoundedVec::new()),
            ready_map: ReadyMap::default(),
            running: None,
            timers: BoundedVec::new(),
        }
    }
}

impl State {
    fn push_ready(&mut self, id: ThreadId, prio: u8) {
        let queue = &mut self.ready[prio as usize];
        if !queue.contains(&id) {
            queue
                .push(id)
                .expect("ready list is bounded by MAX_THREADS");
        }
        self.ready_map.insert(prio);
    }

    fn remove_ready(&mut self, id: ThreadId, prio: u8) {
        let queue = &mut self.ready[prio as usize];
        queue.retain(|queued| *queued != id);
        if queue.is_empty() {
            self.ready_map.remove(prio);
        }
    }

    fn head(&self) -> Option<(ThreadId, u8)> {
        let prio = self.ready_map.highest()?;
        self.ready[prio as usize].first().map(|id| (*id, prio))
    }

    fn add_timer(&mut self, timer: Timer) {
        let index = self
            .timers
            .partition_point(|queued| queued.deadline <= timer.deadline);
        if self.timers.insert(index, timer).is_err() {
            unreachable!("each thread holds at most one timer");
        }
    }

    fn cancel_timer(&mut self, id: ThreadId) {
        self.timers.retain(|timer| timer.thread != id);
    }

    fn suspend(
        &mut self,
        id: ThreadId,
        reason: BlockReason,
        ticks: Option<u32>,
        object: Option<Arc<dyn WaitObject>>,
    ) -> bool {
        let Some(tcb) = self.threads.get_mut(&id) else {
            return false;
        };
        if !matches!(tcb.state, ThreadState::Ready | ThreadState::Running) {
            return false;
        }
        tcb.state = ThreadState::Blocked(reason);
        tcb.reload_slice();
        let prio = tcb.priority;

        self.remove_ready(id, prio);
        if self.running == Some(id) {
            self.running = None;
        }
        if let Some(ticks) = ticks {
            let deadline = self.tick + u64::from(ticks);
            self.add_timer(Timer {
                deadline,
                thread: id,
                object,
            });
        }
        true
    }

    fn make_ready(&mut self, id: ThreadId) -> bool {
        let Some(tcb) = self.threads.get_mut(&id) else {
            return false;
        };
        if !matches!(tcb.state, ThreadState::Blocked(_)) {
            return false;
        }
        tcb.state = ThreadState::Ready;
        let prio = tcb.priority;
        self.cancel_timer(id);
        self.push_ready(id, prio);
        true
    }

    fn rotate(&mut self, id: ThreadId) {
        let Some(tcb) = self.threads.get_mut(&id) else {
            return;
        };
        tcb.state = ThreadState::Ready;
        tcb.reload_slice();
        let prio = tcb.priority;
        self.remove_ready(id, prio);
        self.push_ready(id, prio);
        if self.running == Some(id) {
            self.running = None;
        }
    }
}

/// Ready lists, thread states and the tick clock of one kernel.
pub struct Scheduler {
    state: Mutex<State>,
    trace: Mutex<Option<TraceHook>>,
}

impl Scheduler {
    /// Creates an empty scheduler at tick 0.
    pub fn new(trace: Option<TraceHook>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            trace: Mutex::new(trace),
        }
    }

    /// Sets the trace hook for scheduler records.
    pub fn set_trace_hook(&self, trace: Option<TraceHook>) {
        *self.trace.lock() = trace;
    }

    /// Current tick count.
    pub fn now(&self) -> u64 {
        self.state.lock().tick
    }

    /// State of a registered thread.
    pub fn state_of(&self, id: ThreadId) -> Option<ThreadState> {
        self.state.lock().threads.get(&id).map(|tcb| tcb.state)
    }

    /// Thread chosen by the last scheduling decision, if it is still running.
    pub fn running(&self) -> Option<ThreadId> {
        self.state.lock().running
    }

    /// Checks if any thread is ready.
    pub fn has_work(&self) -> bool {
        self.state.lock().ready_map.highest().is_some()
    }

    /// Checks if a thread of the given priority is ready.
    pub fn is_priority_ready(&self, priority: ThreadPriority) -> bool {
        self.state.lock().ready_map.contains(priority.0)
    }

    /// Number of threads waiting on a deadline.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub(crate) fn register(
        &self,
        id: ThreadId,
        name: &'static str,
        priority: ThreadPriority,
        threshold: ThreadPriority,
        time_slice: TimeSlice,
    ) {
        let mut tcb = Tcb {
            name,
            priority: priority.0,
            threshold: threshold.0,
            time_slice,
            slice_left: 0,
            state: ThreadState::Created,
        };
        tcb.reload_slice();
        self.state.lock().threads.insert(id, tcb);
        self.emit(thread_rec::CREATE, &[id.0, priority.0, threshold.0]);
    }

    /// Moves a `Created` thread to the ready list.
    pub fn resume(&self, id: ThreadId) -> bool {
        let resumed = {
            let mut state = self.state.lock();
            match state.threads.get_mut(&id) {
                Some(tcb) if tcb.state == ThreadState::Created => {
                    tcb.state = ThreadState::Ready;
                    let prio = tcb.priority;
                    state.push_ready(id, prio);
                    true
                }
                _ => false,
            }
        };
        if resumed {
            self.emit(thread_rec::RESUME, &[id.0]);
        }
        resumed
    }

    /// Suspends a ready or running thread.
    ///
    /// With `timeout` set, the thread is woken after that many ticks; when
    /// `object` is given, expiry goes through [`WaitObject::expire`] instead.
    pub fn block(
        &self,
        id: ThreadId,
        reason: BlockReason,
        timeout: Option<u32>,
        object: Option<Arc<dyn WaitObject>>,
    ) -> bool {
        let blocked = self.state.lock().suspend(id, reason, timeout, object);
        if blocked {
            debug!("thread {id:?} blocked ({reason:?}, timeout {timeout:?})");
            self.emit(thread_rec::BLOCK, &[id.0, reason as u8]);
        }
        blocked
    }

    /// Makes a blocked thread ready and cancels its deadline.
    pub fn wake(&self, id: ThreadId) -> bool {
        let woken = self.state.lock().make_ready(id);
        if woken {
            debug!("thread {id:?} woken");
            self.emit(thread_rec::WAKE, &[id.0]);
        }
        woken
    }

    /// Decides which thread runs next and marks it running.
    pub fn plan_next(&self) -> ScheduleDecision {
        let mut notes = Notes::new();
        let decision = {
            let mut state = self.state.lock();
            match state.head() {
                None => {
                    if state.running.take().is_some() {
                        notes.push((sched::IDLE, Vec::new()));
                    }
                    ScheduleDecision::Idle
                }
                Some((head, head_prio)) => {
                    let previous = state.running;
                    let next = match previous {
                        Some(current) if current != head => {
                            let threshold = state.threads[&current].threshold;
                            if head_prio < threshold {
                                if let Some(tcb) = state.threads.get_mut(&current) {
                                    tcb.state = ThreadState::Ready;
                                }
                                notes.push((sched::PREEMPT, vec![current.0, head.0]));
                                head
                            } else {
                                current
                            }
                        }
                        _ => head,
                    };

                    let tcb = state
                        .threads
                        .get_mut(&next)
                        .expect("ready thread is registered");
                    tcb.state = ThreadState::Running;
                    let priority = ThreadPriority(tcb.priority);
                    let name = tcb.name;
                    state.running = Some(next);

                    if previous != Some(next) {
                        debug!("dispatch '{name}' ({next:?}, priority {})", priority.0);
                        notes.push((sched::NEXT, vec![next.0, priority.0]));
                    }
                    ScheduleDecision::Thread { id: next, priority }
                }
            }
        };
        self.flush(notes);
        decision
    }

    /// Applies the action a thread reported after one resumption.
    pub(crate) fn complete(&self, id: ThreadId, action: ThreadAction) {
        let mut notes = Notes::new();
        {
            let mut state = self.state.lock();
            let Some(tcb) = state.threads.get(&id) else {
                return;
            };
            let current = tcb.state;
            let name = tcb.name;
            let prio = tcb.priority;

            match action {
                ThreadAction::Continue | ThreadAction::Sleep(0) => {}
                ThreadAction::Sleep(ticks) => {
                    if state.suspend(id, BlockReason::Sleep, Some(ticks), None) {
                        notes.push((thread_rec::BLOCK, vec![id.0, BlockReason::Sleep as u8]));
                    }
                }
                ThreadAction::Yield => {
                    if current == ThreadState::Running {
                        state.rotate(id);
                        notes.push((thread_rec::YIELD, vec![id.0]));
                    }
                }
                ThreadAction::Blocked => {
                    if !matches!(current, ThreadState::Blocked(_)) {
                        warn!("thread '{name}' reported Blocked without waiting on an object");
                    }
                }
                ThreadAction::Terminated => {
                    state.remove_ready(id, prio);
                    state.cancel_timer(id);
                    if let Some(tcb) = state.threads.get_mut(&id) {
                        tcb.state = ThreadState::Terminated;
                    }
                    info!("thread '{name}' terminated");
                    notes.push((thread_rec::TERMINATE, vec![id.0]));
                }
            }

            let still_running = state
                .threads
                .get(&id)
                .is_some_and(|tcb| tcb.state == ThreadState::Running);
            if state.running == Some(id) && !still_running {
                state.running = None;
            }
        }
        self.flush(notes);
    }

    /// Advances the clock by one tick.
    ///
    /// Expired sleeps become ready, expired timed waits are handed to their
    /// [`WaitObject`], and a running thread with a time slice is rotated once
    /// its slice is used up. Returns the new tick count.
    pub fn tick(&self) -> u64 {
        let mut notes = Notes::new();
        let mut expired: Vec<(ThreadId, Arc<dyn WaitObject>)> = Vec::new();
        let now = {
            let mut state = self.state.lock();
            state.tick += 1;
            let now = state.tick;

            while state.timers.first().is_some_and(|timer| timer.deadline <= now) {
                let timer = state.timers.remove(0);
                match timer.object {
                    Some(object) => expired.push((timer.thread, object)),
                    None => {
                        if state.make_ready(timer.thread) {
                            notes.push((thread_rec::WAKE, vec![timer.thread.0]));
                        }
                    }
                }
            }

            if let Some(current) = state.running {
                let slice_used = match state.threads.get_mut(&current) {
                    Some(tcb) => match tcb.time_slice {
                        TimeSlice::Ticks(_) => {
                            tcb.slice_left = tcb.slice_left.saturating_sub(1);
                            tcb.slice_left == 0
                        }
                        TimeSlice::None => false,
                    },
                    None => false,
                };
                if slice_used {
                    state.rotate(current);
                    notes.push((thread_rec::YIELD, vec![current.0]));
                }
            }

            now
        };

        for (thread, object) in expired {
            object.expire(thread);
        }
        notes.push((sched::TICK, now.to_le_bytes().to_vec()));
        self.flush(notes);
        now
    }

    fn flush(&self, notes: Notes) {
        for (record, payload) in notes {
            self.emit(record, &payload);
        }
    }

    fn emit(&self, record: u8, payload: &[u8]) {
        if let Some(ref trace) = *self.trace.lock() {
            let _ = trace(record, payload, true);
        }
    }
}
