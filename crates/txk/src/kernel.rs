//! Kernel: thread registry, dispatch loop and tick clock.

use core::fmt;
use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;

use crate::event_flags::EventFlagGroup;
use crate::scheduler::{ScheduleDecision, Scheduler, MAX_PRIORITIES, MAX_THREADS};
use crate::sync::{Arc, Mutex};
use crate::thread::{
    ThreadAction, ThreadConfig, ThreadContext, ThreadControl, ThreadEntry, ThreadHandle, ThreadId,
    ThreadState, MINIMUM_STACK_SIZE,
};
use crate::trace::TraceHook;

/// Configuration for the kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    /// Priorities `0..max_priorities` are accepted; capped at 32.
    pub max_priorities: u8,
    /// Upper bound on resumptions between two ticks in `run_until_idle`.
    pub steps_per_tick: usize,
    /// Wall-clock length of one tick in [`Kernel::enter`].
    pub tick_period: Duration,
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "txk",
            max_priorities: MAX_PRIORITIES as u8,
            steps_per_tick: 64,
            tick_period: Duration::from_millis(10),
            idle_callback: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    fn priority_limit(&self) -> u8 {
        self.max_priorities.min(MAX_PRIORITIES as u8)
    }
}

/// Builder for [`KernelConfig`].
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the number of priority levels.
    pub fn max_priorities(mut self, max: u8) -> Self {
        self.config.max_priorities = max;
        self
    }

    /// Sets the resumption budget between ticks.
    pub fn steps_per_tick(mut self, steps: usize) -> Self {
        self.config.steps_per_tick = steps;
        self
    }

    /// Sets the real-time tick period.
    pub fn tick_period(mut self, period: Duration) -> Self {
        self.config.tick_period = period;
        self
    }

    /// Sets the idle callback function.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

/// Reasons a thread cannot be created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("thread '{0}' has no stack")]
    MissingStack(&'static str),
    #[error("stack size {size} is below the minimum of {MINIMUM_STACK_SIZE} bytes")]
    StackBelowMinimum { size: usize },
    #[error("stack region of {region} bytes cannot hold {required} bytes")]
    StackTooSmall { region: usize, required: usize },
    #[error("priority {priority} is outside 0..{limit}")]
    InvalidPriority { priority: u8, limit: u8 },
    #[error("preemption threshold {threshold} is less urgent than priority {priority}")]
    InvalidThreshold { threshold: u8, priority: u8 },
    #[error("a thread named '{0}' already exists")]
    DuplicateName(&'static str),
    #[error("thread table is full ({MAX_THREADS} threads)")]
    TooManyThreads,
}

/// Kernel operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("invalid thread configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("thread {0:?} is not registered with this kernel")]
    ThreadNotFound(ThreadId),
    #[error("thread {0:?} was already started")]
    AlreadyStarted(ThreadId),
}

struct ThreadSlot {
    control: Arc<ThreadControl>,
    entry: Option<ThreadEntry>,
    iteration: u64,
}

pub struct KernelBuilder {
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            trace: None,
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> Kernel {
        Kernel::new(self.config, self.trace)
    }
}

/// Owns the threads and drives them.
///
/// Nothing is global: the setup code builds a kernel, creates threads and
/// event flag groups through it, then runs it with [`Kernel::enter`] or the
/// stepping calls.
pub struct Kernel {
    config: KernelConfig,
    scheduler: Arc<Scheduler>,
    threads: Mutex<BTreeMap<ThreadId, ThreadSlot>>,
    trace: Option<TraceHook>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    fn new(config: KernelConfig, trace: Option<TraceHook>) -> Self {
        Self {
            config,
            scheduler: Arc::new(Scheduler::new(trace.clone())),
            threads: Mutex::new(BTreeMap::new()),
            trace,
        }
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }

    /// Current tick count.
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Number of threads created so far, terminated ones included.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Creates a thread from `config`.
    ///
    /// The stack region moves into the thread. Auto-start threads are ready
    /// on return; others wait for [`Kernel::resume`].
    pub fn create_thread(&self, config: ThreadConfig) -> Result<ThreadHandle, KernelError> {
        let ThreadConfig {
            name,
            entry,
            input,
            stack,
            priority,
            preemption_threshold,
            time_slice,
            auto_start,
        } = config;

        let (stack, stack_size) = stack.ok_or(ConfigError::MissingStack(name))?;
        if stack_size < MINIMUM_STACK_SIZE {
            return Err(ConfigError::StackBelowMinimum { size: stack_size }.into());
        }
        if stack.len() < stack_size {
            return Err(ConfigError::StackTooSmall {
                region: stack.len(),
                required: stack_size,
            }
            .into());
        }
        let limit = self.config.priority_limit();
        if priority.0 >= limit {
            return Err(ConfigError::InvalidPriority {
                priority: priority.0,
                limit,
            }
            .into());
        }
        if preemption_threshold > priority {
            return Err(ConfigError::InvalidThreshold {
                threshold: preemption_threshold.0,
                priority: priority.0,
            }
            .into());
        }

        let control = {
            let mut threads = self.threads.lock();
            if threads.values().any(|slot| slot.control.name == name) {
                return Err(ConfigError::DuplicateName(name).into());
            }
            if threads.len() >= MAX_THREADS {
                return Err(ConfigError::TooManyThreads.into());
            }

            let id = ThreadId(threads.len() as u8 + 1);
            let control = Arc::new(ThreadControl {
                id,
                name,
                priority,
                preemption_threshold,
                time_slice,
                input,
                stack_size,
                stack,
                run_count: Default::default(),
            });
            threads.insert(
                id,
                ThreadSlot {
                    control: Arc::clone(&control),
                    entry: Some(entry),
                    iteration: 0,
                },
            );
            control
        };

        self.scheduler.register(
            control.id,
            name,
            priority,
            preemption_threshold,
            time_slice,
        );
        debug!(
            "thread '{name}' created ({:?}, priority {}, threshold {}, stack {} bytes)",
            control.id, priority.0, preemption_threshold.0, stack_size
        );
        if auto_start {
            self.scheduler.resume(control.id);
        }

        Ok(ThreadHandle::new(control, Arc::clone(&self.scheduler)))
    }

    /// Starts a thread created without auto-start.
    pub fn resume(&self, handle: &ThreadHandle) -> Result<(), KernelError> {
        let id = handle.id();
        match self.scheduler.state_of(id) {
            None => Err(KernelError::ThreadNotFound(id)),
            Some(ThreadState::Created) => {
                self.scheduler.resume(id);
                Ok(())
            }
            Some(_) => Err(KernelError::AlreadyStarted(id)),
        }
    }

    /// Creates an event flag group bound to this kernel's scheduler.
    pub fn create_event_flags(&self, name: &'static str) -> EventFlagGroup {
        EventFlagGroup::new(name, Arc::clone(&self.scheduler), self.trace.clone())
    }

    /// Resumes the thread chosen by the scheduler once.
    ///
    /// Returns `false` when no thread is ready.
    pub fn dispatch_once(&self) -> bool {
        let id = match self.scheduler.plan_next() {
            ScheduleDecision::Idle => return false,
            ScheduleDecision::Thread { id, .. } => id,
        };

        let taken = {
            let mut threads = self.threads.lock();
            threads.get_mut(&id).and_then(|slot| {
                slot.entry
                    .take()
                    .map(|entry| (Arc::clone(&slot.control), entry, slot.iteration))
            })
        };
        let Some((control, mut entry, iteration)) = taken else {
            warn!("scheduled thread {id:?} has no entry; terminating it");
            self.scheduler.complete(id, ThreadAction::Terminated);
            return true;
        };

        let mut ctx = ThreadContext::new(
            &control,
            iteration,
            self.scheduler.now(),
            Arc::clone(&self.scheduler),
        );
        let action = entry(&mut ctx);
        control.run_count.fetch_add(1, Ordering::Relaxed);

        if let Some(slot) = self.threads.lock().get_mut(&id) {
            slot.iteration += 1;
            if action != ThreadAction::Terminated {
                slot.entry = Some(entry);
            }
        }
        self.scheduler.complete(id, action);
        true
    }

    /// Dispatches until nothing is ready or the step budget is spent.
    ///
    /// Returns the number of resumptions.
    pub fn run_until_idle(&self) -> usize {
        let mut steps = 0;
        while steps < self.config.steps_per_tick && self.dispatch_once() {
            steps += 1;
        }
        if let Some(idle_cb) = self.config.idle_callback {
            idle_cb();
        }
        steps
    }

    /// Advances the clock by one tick.
    pub fn tick(&self) -> u64 {
        self.scheduler.tick()
    }

    /// Runs for `ticks` ticks without real-time pacing.
    pub fn run_ticks(&self, ticks: u64) {
        for _ in 0..ticks {
            self.run_until_idle();
            self.tick();
        }
        self.run_until_idle();
    }

    /// Runs the kernel forever, one tick per `tick_period`.
    pub fn enter(&self) -> ! {
        info!(
            "kernel '{}' entered ({} threads, tick {:?})",
            self.config.name,
            self.threads.lock().len(),
            self.config.tick_period
        );
        loop {
            let started = Instant::now();
            self.run_until_idle();
            self.tick();
            if let Some(rest) = self.config.tick_period.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("now", &self.scheduler.now())
            .field("threads", &self.threads.lock().len())
            .finish()
    }
}
