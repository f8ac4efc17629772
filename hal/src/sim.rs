//! Simulated GPIO line for host builds.
//!
//! [`SimulatedPin`] behaves like a line on a GPIO controller that has to be
//! requested before use and freed afterwards. Toggling requests the line,
//! switches it to output, drives the opposite level and frees it again.
//! A [`PinProbe`] observes the line from outside, after the pin itself has
//! been moved into a thread.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{HalError, HalResult};
use crate::gpio::{GpioPin, Level, PinMode};

/// Number of lines on the simulated controller.
pub const SIMULATED_LINES: u32 = 64;

#[derive(Debug, Default)]
struct LineLog {
    attempts: usize,
    levels: Vec<Level>,
}

/// Read-only view of a [`SimulatedPin`].
#[derive(Debug, Clone)]
pub struct PinProbe {
    log: Arc<Mutex<LineLog>>,
}

impl PinProbe {
    /// Levels driven by successful toggles, oldest first.
    pub fn levels(&self) -> Vec<Level> {
        self.log.lock().levels.clone()
    }

    /// Number of successful toggles.
    pub fn toggles(&self) -> usize {
        self.log.lock().levels.len()
    }

    /// Number of toggle attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.log.lock().attempts
    }

    /// Last level driven, if any.
    pub fn level(&self) -> Option<Level> {
        self.log.lock().levels.last().copied()
    }
}

/// A requestable GPIO line with fault injection.
#[derive(Debug)]
pub struct SimulatedPin {
    line: u32,
    mode: PinMode,
    level: Level,
    requested: bool,
    fail_on: Option<usize>,
    log: Arc<Mutex<LineLog>>,
}

impl SimulatedPin {
    /// Create a pin for `line`, initially a low input.
    pub fn new(line: u32) -> HalResult<Self> {
        if line >= SIMULATED_LINES {
            return Err(HalError::InvalidParameter);
        }
        Ok(Self {
            line,
            mode: PinMode::Input,
            level: Level::Low,
            requested: false,
            fail_on: None,
            log: Arc::default(),
        })
    }

    /// Make the `n`-th toggle attempt (1-based) fail at the request step.
    pub fn fail_on_toggle(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn probe(&self) -> PinProbe {
        PinProbe {
            log: Arc::clone(&self.log),
        }
    }

    /// Claim the line.
    pub fn request(&mut self) -> HalResult<()> {
        if self.requested {
            return Err(HalError::LineBusy(self.line));
        }
        self.requested = true;
        Ok(())
    }

    /// Release the line.
    pub fn free(&mut self) -> HalResult<()> {
        if !self.requested {
            return Err(HalError::LineNotRequested(self.line));
        }
        self.requested = false;
        Ok(())
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

impl GpioPin for SimulatedPin {
    fn set_mode(&mut self, mode: PinMode) -> HalResult<()> {
        if !self.requested {
            return Err(HalError::LineNotRequested(self.line));
        }
        self.mode = mode;
        Ok(())
    }

    fn read(&self) -> HalResult<Level> {
        Ok(self.level)
    }

    fn write(&mut self, level: Level) -> HalResult<()> {
        if !self.requested {
            return Err(HalError::LineNotRequested(self.line));
        }
        if !self.mode.is_output() {
            return Err(HalError::ConfigurationError);
        }
        self.level = level;
        Ok(())
    }

    fn toggle(&mut self) -> HalResult<()> {
        let attempt = {
            let mut log = self.log.lock();
            log.attempts += 1;
            log.attempts
        };
        if self.fail_on == Some(attempt) {
            return Err(HalError::HardwareError);
        }

        self.request()?;
        let next = self.level.toggled();
        let driven = self
            .set_mode(PinMode::Output)
            .and_then(|()| self.write(next));
        self.free()?;
        driven?;

        self.log.lock().levels.push(next);
        Ok(())
    }

    fn pin_number(&self) -> u32 {
        self.line
    }
}
