//! Timer multiplexer error types.

use core::fmt;

/// Errors returned by [`TimerMux`](crate::TimerMux) operations.
///
/// None of these are fatal: the multiplexer's state is unchanged whenever
/// an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Every timer slot is in use.
    CapacityExhausted,
    /// The handle does not refer to a pending or expired timer (it already
    /// ran, was cancelled, or belongs to a reused slot).
    InvalidHandle,
    /// The requested delay exceeds the longest period the hardware can be
    /// armed for.
    OverlongDelay {
        /// Requested delay in microseconds (saturated to `u32::MAX`).
        requested: u32,
        /// Longest accepted delay in microseconds.
        max: u32,
    },
    /// [`TimerMux::init`](crate::TimerMux::init) has not been called.
    NotInitialized,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExhausted => f.write_str("timer capacity exhausted"),
            Self::InvalidHandle => f.write_str("timer handle is not active"),
            Self::OverlongDelay { requested, max } => {
                write!(f, "delay of {requested}us exceeds maximum of {max}us")
            }
            Self::NotInitialized => f.write_str("timer multiplexer not initialized"),
        }
    }
}

impl core::error::Error for TimerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_all_variants() {
        assert_eq!(
            format!("{}", TimerError::CapacityExhausted),
            "timer capacity exhausted"
        );
        assert_eq!(
            format!("{}", TimerError::InvalidHandle),
            "timer handle is not active"
        );
        assert_eq!(
            format!(
                "{}",
                TimerError::OverlongDelay {
                    requested: 9_000_000,
                    max: 8_000_000
                }
            ),
            "delay of 9000000us exceeds maximum of 8000000us"
        );
        assert_eq!(
            format!("{}", TimerError::NotInitialized),
            "timer multiplexer not initialized"
        );
    }

    #[test]
    fn error_equality() {
        assert_eq!(TimerError::InvalidHandle, TimerError::InvalidHandle);
        assert_ne!(TimerError::InvalidHandle, TimerError::CapacityExhausted);
    }
}
