//! Hardware Abstraction Layer (HAL) for the demo boards
//!
//! Vendor-agnostic GPIO traits. With `std`, [`sim`] provides a simulated
//! output line for running and testing on a host.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod error;
pub mod gpio;
#[cfg(feature = "std")]
pub mod sim;

// Re-export commonly used types
pub use error::{HalError, HalResult};
pub use gpio::{GpioPin, Level, PinMode};
#[cfg(feature = "std")]
pub use sim::{PinProbe, SimulatedPin};
