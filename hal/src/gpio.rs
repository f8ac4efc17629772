//! GPIO (General Purpose Input/Output) abstraction

use crate::error::HalResult;

/// GPIO pin modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Input (floating)
    Input,
    /// Output (push-pull)
    Output,
    /// Output (open-drain)
    OutputOpenDrain,
}

impl PinMode {
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output | Self::OutputOpenDrain)
    }
}

/// GPIO pin levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Low level (0V)
    Low,
    /// High level (VCC)
    High,
}

impl Level {
    /// The opposite level.
    pub fn toggled(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

/// GPIO pin trait (object-safe)
pub trait GpioPin: Send + Sync {
    /// Configure pin mode
    fn set_mode(&mut self, mode: PinMode) -> HalResult<()>;

    /// Read current level
    fn read(&self) -> HalResult<Level>;

    /// Write level (for output pins)
    fn write(&mut self, level: Level) -> HalResult<()>;

    /// Drive the opposite of the current level
    fn toggle(&mut self) -> HalResult<()> {
        let next = self.read()?.toggled();
        self.write(next)
    }

    /// Get pin number
    fn pin_number(&self) -> u32;
}
