//! End-to-end runs of the blinky demo on a simulated line.

use blinky::{
    Blinky, ConsumerFault, DemoError, DEMO_BYTE_POOL_SIZE, DEMO_STACK_SIZE, EVENT_BIT0,
    GPIO_LINE, SLEEP_TICKS,
};
use hal::{HalError, Level, SimulatedPin};
use txk::{BlockReason, Kernel, ThreadPriority, ThreadState};
use txmem::{BytePool, PoolError};

fn cycles(n: u64) -> u64 {
    n * u64::from(SLEEP_TICKS)
}

#[test]
fn setup_creates_threads_with_fixed_parameters() {
    let kernel = Kernel::builder().build();
    let (demo, _probe) = Blinky::simulated(&kernel, None).unwrap();

    assert_eq!(demo.producer.name(), "thread 0");
    assert_eq!(demo.producer.priority(), ThreadPriority(1));
    assert_eq!(demo.consumer.name(), "thread 1");
    assert_eq!(demo.consumer.priority(), ThreadPriority(2));
    assert_eq!(demo.consumer.preemption_threshold(), ThreadPriority(2));
    assert_eq!(demo.consumer.stack_size(), DEMO_STACK_SIZE);
    assert_eq!(demo.flags.name(), "event flags 0");

    let info = demo.pool.info();
    assert_eq!(info.capacity, DEMO_BYTE_POOL_SIZE);
    assert_eq!(info.available, DEMO_BYTE_POOL_SIZE - 2 * DEMO_STACK_SIZE);
    assert_ne!(demo.producer.stack().range(), demo.consumer.stack().range());
}

#[test]
fn producer_runs_before_consumer() {
    let kernel = Kernel::builder().build();
    let (demo, _probe) = Blinky::simulated(&kernel, None).unwrap();

    assert!(kernel.dispatch_once());
    assert_eq!(demo.producer.run_count(), 1);
    assert_eq!(demo.consumer.run_count(), 0);

    assert!(kernel.dispatch_once());
    assert_eq!(demo.consumer.run_count(), 1);
    assert_eq!(
        demo.consumer.state(),
        ThreadState::Blocked(BlockReason::EventFlags)
    );
}

#[test]
fn each_wake_cycle_toggles_once() {
    let kernel = Kernel::builder().build();
    let (demo, probe) = Blinky::simulated(&kernel, None).unwrap();

    kernel.run_ticks(cycles(1) - 1);
    assert_eq!(probe.toggles(), 0);

    kernel.run_ticks(1);
    assert_eq!(probe.toggles(), 1);

    kernel.run_ticks(cycles(5));
    assert_eq!(probe.toggles(), 6);
    assert_eq!(
        probe.levels(),
        vec![
            Level::High,
            Level::Low,
            Level::High,
            Level::Low,
            Level::High,
            Level::Low
        ]
    );
    assert_eq!(demo.consumer_fault(), None);
    assert_eq!(demo.flags.info().flags, 0);
    assert_eq!(demo.flags.info().suspended, 1);
}

#[test]
fn toggle_failure_stops_only_the_consumer() {
    let kernel = Kernel::builder().build();
    let (demo, probe) = Blinky::simulated(&kernel, Some(3)).unwrap();

    kernel.run_ticks(cycles(3));
    assert_eq!(probe.attempts(), 3);
    assert_eq!(probe.toggles(), 2);
    assert!(demo.consumer.is_terminated());
    assert_eq!(
        demo.consumer_fault(),
        Some(ConsumerFault::ExternalAction {
            line: GPIO_LINE,
            source: HalError::HardwareError,
        })
    );

    let producer_runs = demo.producer.run_count();
    kernel.run_ticks(cycles(4));
    assert_eq!(demo.producer.run_count(), producer_runs + 4);
    assert_eq!(probe.attempts(), 3);
    assert_eq!(demo.flags.info().flags, EVENT_BIT0);
    assert_eq!(demo.flags.info().suspended, 0);
}

#[test]
fn set_before_first_wait_is_delivered() {
    let kernel = Kernel::builder().build();
    let (demo, probe) = Blinky::simulated(&kernel, None).unwrap();

    demo.flags.set(EVENT_BIT0, txk::SetOption::Or);
    kernel.run_until_idle();

    assert_eq!(probe.toggles(), 1);
    assert_eq!(demo.flags.info().flags, 0);
}

#[test]
fn unexpected_flags_stop_the_consumer() {
    let kernel = Kernel::builder().build();
    let (demo, probe) = Blinky::simulated(&kernel, None).unwrap();

    demo.flags.set(EVENT_BIT0 | 0x4, txk::SetOption::Or);
    kernel.run_until_idle();

    assert_eq!(
        demo.consumer_fault(),
        Some(ConsumerFault::UnexpectedFlags(0x5))
    );
    assert_eq!(probe.toggles(), 0);
    assert!(demo.consumer.is_terminated());
}

#[test]
fn exhausted_pool_creates_no_thread() {
    let kernel = Kernel::builder().build();
    let pool = BytePool::with_capacity("byte pool 0", DEMO_BYTE_POOL_SIZE).unwrap();
    let _reserved = pool
        .allocate(DEMO_BYTE_POOL_SIZE - DEMO_STACK_SIZE - 8)
        .unwrap();

    let line = SimulatedPin::new(GPIO_LINE).unwrap();
    let err = Blinky::setup_with_pool(&kernel, pool.clone(), line).unwrap_err();

    assert!(matches!(
        err,
        DemoError::Pool(PoolError::OutOfMemory {
            requested: DEMO_STACK_SIZE,
            ..
        })
    ));
    assert_eq!(kernel.thread_count(), 0);
    assert!(!kernel.dispatch_once());
    assert_eq!(pool.info().allocations, 1);
}

#[test]
fn invalid_line_fails_setup() {
    let err = SimulatedPin::new(64).map_err(DemoError::from).unwrap_err();
    assert!(matches!(err, DemoError::Hal(HalError::InvalidParameter)));
}
