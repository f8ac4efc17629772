//! Common error types for HAL operations

use core::fmt;

/// HAL operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Invalid parameter provided
    InvalidParameter,
    /// Operation not supported by this implementation
    NotSupported,
    /// The line is already requested by another user
    LineBusy(u32),
    /// The line was used without being requested first
    LineNotRequested(u32),
    /// Pin is not configured for the operation
    ConfigurationError,
    /// Hardware error occurred
    HardwareError,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::LineBusy(line) => write!(f, "gpio line {line} is busy"),
            Self::LineNotRequested(line) => write!(f, "gpio line {line} was not requested"),
            Self::ConfigurationError => write!(f, "configuration error"),
            Self::HardwareError => write!(f, "hardware error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;
