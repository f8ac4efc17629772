use std::time::Duration;

use anyhow::Context;
use blinky::logger::ConsoleLogger;
use blinky::{Blinky, SLEEP_TICKS};
use clap::Parser;
use log::{info, LevelFilter};
use txk::{Kernel, KernelConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Two threads blinking a GPIO line through event flags")]
struct Opts {
    /// Run this many ticks without pacing, then exit. Runs forever if absent.
    #[arg(long, value_name = "N")]
    ticks: Option<u64>,

    /// Length of one kernel tick in milliseconds.
    #[arg(long = "tick-ms", default_value_t = 10, value_name = "MS")]
    tick_ms: u64,

    /// Make the N-th toggle of the output line fail.
    #[arg(long = "fail-after", value_name = "N")]
    fail_after: Option<usize>,

    #[arg(long = "log-level", default_value = "info", value_name = "LEVEL")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    ConsoleLogger::install(opts.log_level).context("installing console logger")?;

    let config = KernelConfig::builder()
        .name("blinky")
        .tick_period(Duration::from_millis(opts.tick_ms))
        .build();
    let kernel = Kernel::with_config(config).build();
    let (demo, probe) =
        Blinky::simulated(&kernel, opts.fail_after).context("setting up the demo")?;

    let Some(ticks) = opts.ticks else {
        kernel.enter();
    };

    kernel.run_ticks(ticks);
    info!(
        "{} ticks: {} toggles (expected {}), flags {:#x}",
        kernel.now(),
        probe.toggles(),
        ticks / u64::from(SLEEP_TICKS),
        demo.flags.info().flags
    );
    if let Some(fault) = demo.consumer_fault() {
        info!("consumer stopped: {fault}");
    }
    Ok(())
}
