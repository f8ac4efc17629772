//! Dispatch order: priorities, preemption threshold, yielding, time slices.

use std::sync::{Arc, Mutex};

use txk::{Kernel, KernelConfig, ThreadAction, ThreadConfig, ThreadPriority, TimeSlice};
use txmem::BytePool;

type Order = Arc<Mutex<Vec<&'static str>>>;

struct Rig {
    kernel: Kernel,
    pool: BytePool,
    order: Order,
}

impl Rig {
    fn new(steps_per_tick: usize) -> Self {
        let config = KernelConfig::builder().steps_per_tick(steps_per_tick).build();
        Self {
            kernel: Kernel::with_config(config).build(),
            pool: BytePool::with_capacity("preempt pool", 8192).unwrap(),
            order: Order::default(),
        }
    }

    /// Thread that records each resumption and then reports `action`.
    fn spawn(
        &self,
        name: &'static str,
        config: impl FnOnce(ThreadConfig) -> ThreadConfig,
        action: ThreadAction,
        priority: u8,
    ) {
        let order = Arc::clone(&self.order);
        let base = ThreadConfig::new(
            name,
            ThreadPriority(priority),
            Box::new(move |_| {
                order.lock().unwrap().push(name);
                action
            }),
        )
        .with_stack(self.pool.allocate(512).unwrap(), 512);
        self.kernel.create_thread(config(base)).unwrap();
    }

    fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.order.lock().unwrap())
    }
}

fn plain(config: ThreadConfig) -> ThreadConfig {
    config
}

#[test]
fn most_urgent_ready_thread_runs_first() {
    let rig = Rig::new(8);
    rig.spawn("low", plain, ThreadAction::Sleep(10), 9);
    rig.spawn("mid", plain, ThreadAction::Sleep(10), 5);
    rig.spawn("high", plain, ThreadAction::Sleep(10), 1);

    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["high", "mid", "low"]);
}

#[test]
fn waking_urgent_thread_preempts_busy_one() {
    let rig = Rig::new(4);
    rig.spawn("busy", plain, ThreadAction::Continue, 5);
    rig.spawn("urgent", plain, ThreadAction::Sleep(2), 1);

    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["urgent", "busy", "busy", "busy"]);

    rig.kernel.tick();
    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["busy"; 4]);

    rig.kernel.tick();
    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["urgent", "busy", "busy", "busy"]);
}

#[test]
fn threshold_shields_running_thread() {
    let rig = Rig::new(3);
    rig.spawn(
        "shielded",
        |c| c.with_preemption_threshold(ThreadPriority(2)),
        ThreadAction::Continue,
        5,
    );
    rig.spawn("mid", plain, ThreadAction::Sleep(1), 3);
    rig.spawn("high", plain, ThreadAction::Sleep(2), 1);

    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["high", "mid", "shielded"]);

    // "mid" is ready again but not more urgent than the threshold.
    rig.kernel.tick();
    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["shielded"; 3]);

    // "high" beats the threshold; "mid" runs as soon as the CPU is released.
    rig.kernel.tick();
    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["high", "mid", "shielded"]);
}

#[test]
fn yield_rotates_equal_priorities() {
    let rig = Rig::new(4);
    rig.spawn("a", plain, ThreadAction::Yield, 4);
    rig.spawn("b", plain, ThreadAction::Yield, 4);

    rig.kernel.run_until_idle();
    assert_eq!(rig.take(), vec!["a", "b", "a", "b"]);
}

#[test]
fn without_time_slice_first_thread_keeps_cpu() {
    let rig = Rig::new(2);
    rig.spawn("a", plain, ThreadAction::Continue, 4);
    rig.spawn("b", plain, ThreadAction::Continue, 4);

    rig.kernel.run_ticks(4);
    assert!(rig.take().iter().all(|name| *name == "a"));
}

#[test]
fn time_slice_rotates_after_its_ticks() {
    let rig = Rig::new(2);
    let sliced = |c: ThreadConfig| c.with_time_slice(TimeSlice::Ticks(2));
    rig.spawn("a", sliced, ThreadAction::Continue, 4);
    rig.spawn("b", sliced, ThreadAction::Continue, 4);

    rig.kernel.run_ticks(4);
    assert_eq!(
        rig.take(),
        vec!["a", "a", "a", "a", "b", "b", "b", "b", "a", "a"]
    );
}
