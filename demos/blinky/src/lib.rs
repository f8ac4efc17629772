//! Blinky: a producer thread wakes a consumer thread through an event flag
//! group every [`SLEEP_TICKS`] ticks, and the consumer toggles a GPIO line.
//!
//! [`Blinky::setup`] builds everything on a caller-provided kernel: the byte
//! pool, both thread stacks, the flag group and the two threads.

pub mod logger;

use std::sync::Arc;

use hal::{GpioPin, HalError, PinProbe, SimulatedPin};
use log::{debug, error, info};
use parking_lot::Mutex;
use thiserror::Error;
use txk::{
    EventFlagGroup, FlagError, GetOption, Kernel, KernelError, SetOption, ThreadAction,
    ThreadConfig, ThreadContext, ThreadEntry, ThreadHandle, ThreadPriority, TimeSlice, WaitOption,
};
use txmem::{BytePool, PoolError};

pub const DEMO_STACK_SIZE: usize = 1024;
pub const DEMO_BYTE_POOL_SIZE: usize = 9120;
/// Producer period.
pub const SLEEP_TICKS: u32 = 50;
pub const EVENT_BIT0: u32 = 0x1;
/// Output line toggled by the consumer.
pub const GPIO_LINE: u32 = 8;

pub const PRODUCER_NAME: &str = "thread 0";
pub const CONSUMER_NAME: &str = "thread 1";
pub const PRODUCER_PRIORITY: ThreadPriority = ThreadPriority(1);
pub const CONSUMER_PRIORITY: ThreadPriority = ThreadPriority(2);

/// Setup failures.
#[derive(Error, Debug)]
pub enum DemoError {
    #[error("byte pool: {0}")]
    Pool(#[from] PoolError),
    #[error("kernel: {0}")]
    Kernel(#[from] KernelError),
    #[error("gpio: {0}")]
    Hal(#[from] HalError),
}

/// Why the consumer left its loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerFault {
    #[error("event flag wait failed: {0}")]
    Wait(#[from] FlagError),
    #[error("unexpected event flags {0:#x}")]
    UnexpectedFlags(u32),
    #[error("toggle of gpio line {line} failed: {source}")]
    ExternalAction { line: u32, source: HalError },
}

type FaultSlot = Arc<Mutex<Option<ConsumerFault>>>;

/// Handles to everything [`Blinky::setup`] created.
#[derive(Debug)]
pub struct Blinky {
    pub pool: BytePool,
    pub flags: EventFlagGroup,
    pub producer: ThreadHandle,
    pub consumer: ThreadHandle,
    fault: FaultSlot,
}

impl Blinky {
    /// Builds the demo over a fresh pool of [`DEMO_BYTE_POOL_SIZE`] bytes.
    pub fn setup<P>(kernel: &Kernel, line: P) -> Result<Self, DemoError>
    where
        P: GpioPin + 'static,
    {
        let memory_area = vec![0u8; DEMO_BYTE_POOL_SIZE];
        let pool = BytePool::create("byte pool 0", memory_area, DEMO_BYTE_POOL_SIZE)?;
        Self::setup_with_pool(kernel, pool, line)
    }

    /// Builds the demo with stacks taken from `pool`.
    ///
    /// Both stacks are allocated before any thread is created, so a pool
    /// that is too small leaves the kernel untouched.
    pub fn setup_with_pool<P>(kernel: &Kernel, pool: BytePool, line: P) -> Result<Self, DemoError>
    where
        P: GpioPin + 'static,
    {
        let producer_stack = pool.allocate(DEMO_STACK_SIZE)?;
        let consumer_stack = pool.allocate(DEMO_STACK_SIZE)?;

        let flags = kernel.create_event_flags("event flags 0");
        let fault = FaultSlot::default();

        let producer = kernel.create_thread(
            ThreadConfig::new(PRODUCER_NAME, PRODUCER_PRIORITY, producer(flags.clone()))
                .with_stack(producer_stack, DEMO_STACK_SIZE)
                .with_preemption_threshold(PRODUCER_PRIORITY)
                .with_time_slice(TimeSlice::None),
        )?;
        let consumer = kernel.create_thread(
            ThreadConfig::new(
                CONSUMER_NAME,
                CONSUMER_PRIORITY,
                consumer(flags.clone(), line, Arc::clone(&fault)),
            )
            .with_stack(consumer_stack, DEMO_STACK_SIZE)
            .with_preemption_threshold(CONSUMER_PRIORITY)
            .with_time_slice(TimeSlice::None),
        )?;

        info!(
            "demo ready: '{}' {} bytes free",
            pool.name(),
            pool.info().available
        );
        Ok(Self {
            pool,
            flags,
            producer,
            consumer,
            fault,
        })
    }

    /// Builds the demo on a simulated line [`GPIO_LINE`], optionally failing
    /// its `fail_on`-th toggle. Returns a probe observing the line.
    pub fn simulated(
        kernel: &Kernel,
        fail_on: Option<usize>,
    ) -> Result<(Self, PinProbe), DemoError> {
        let mut pin = SimulatedPin::new(GPIO_LINE)?;
        if let Some(n) = fail_on {
            pin = pin.fail_on_toggle(n);
        }
        let probe = pin.probe();
        Ok((Self::setup(kernel, pin)?, probe))
    }

    /// Reason the consumer stopped, if it did.
    pub fn consumer_fault(&self) -> Option<ConsumerFault> {
        self.fault.lock().clone()
    }
}

fn producer(flags: EventFlagGroup) -> ThreadEntry {
    Box::new(move |ctx| {
        if ctx.iteration() == 0 {
            info!("{} start", ctx.name());
        } else {
            flags.set(EVENT_BIT0, SetOption::Or);
        }
        ThreadAction::Sleep(SLEEP_TICKS)
    })
}

fn consumer<P>(flags: EventFlagGroup, mut line: P, fault: FaultSlot) -> ThreadEntry
where
    P: GpioPin + 'static,
{
    Box::new(move |ctx| {
        if ctx.iteration() == 0 {
            info!("{} start", ctx.name());
        }
        match consume(&flags, ctx, &mut line) {
            Ok(true) => ThreadAction::Continue,
            Ok(false) => ThreadAction::Blocked,
            Err(err) => {
                error!("{}: {err}; leaving loop", ctx.name());
                *fault.lock() = Some(err);
                ThreadAction::Terminated
            }
        }
    })
}

/// One consumer step. `Ok(false)` means the thread is now waiting.
fn consume<P: GpioPin>(
    flags: &EventFlagGroup,
    ctx: &ThreadContext,
    line: &mut P,
) -> Result<bool, ConsumerFault> {
    let actual = match flags.get(ctx, EVENT_BIT0, GetOption::OR_CLEAR, WaitOption::Forever) {
        Err(FlagError::WouldBlock) => return Ok(false),
        result => result?,
    };
    if actual != EVENT_BIT0 {
        return Err(ConsumerFault::UnexpectedFlags(actual));
    }

    line.toggle()
        .map_err(|source| ConsumerFault::ExternalAction {
            line: line.pin_number(),
            source,
        })?;
    debug!("line {} toggled at tick {}", line.pin_number(), ctx.now());
    Ok(true)
}
