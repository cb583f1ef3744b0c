//! Build-time defaults and runtime configuration.
//!
//! Constants here are the single source of truth for the limits the
//! multiplexer enforces. [`Config`] carries the per-instance policy and is
//! `const`-constructible so a [`TimerMux`](crate::TimerMux) can live in a
//! `static`.

use crate::log::LogLevel;

/// Number of timer slots used by the reference board configuration.
pub const DEFAULT_CAPACITY: usize = 10;

/// Longest period the reference peripheral can be armed for (8 s).
pub const DEFAULT_MAX_PERIOD_US: u32 = 8_000_000;

/// Largest period that keeps deadline comparisons correct across a wrap
/// of the 32-bit microsecond counter.
#[allow(clippy::cast_sign_loss)]
pub const MAX_WRAP_SAFE_PERIOD_US: u32 = i32::MAX as u32;

/// Messages more verbose than this level are discarded before reaching
/// the registered sink.
pub const MAX_LOG_LEVEL: LogLevel = if cfg!(debug_assertions) {
    LogLevel::Trace
} else {
    LogLevel::Info
};

/// What [`TimerMux::schedule`](crate::TimerMux::schedule) does with a delay
/// longer than the hardware can be armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlongPolicy {
    /// Fail with [`TimerError::OverlongDelay`](crate::TimerError::OverlongDelay).
    Reject,
    /// Shorten the delay to the maximum period and log a warning.
    Clamp,
}

/// Per-instance multiplexer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Handling of delays beyond the maximum period.
    pub overlong: OverlongPolicy,
    /// Shortest period ever programmed into the hardware, in microseconds.
    ///
    /// A zero-delay timer is armed with this period so the peripheral
    /// always has a real countdown to run.
    pub min_period: u32,
}

impl Config {
    /// Rejects overlong delays; 1 µs minimum period.
    pub const DEFAULT: Self = Self {
        overlong: OverlongPolicy::Reject,
        min_period: 1,
    };

    /// Returns a copy with the given overlong-delay policy.
    #[must_use]
    pub const fn with_overlong(mut self, overlong: OverlongPolicy) -> Self {
        self.overlong = overlong;
        self
    }

    /// Returns a copy with the given minimum period (at least 1 µs).
    #[must_use]
    pub const fn with_min_period(mut self, micros: u32) -> Self {
        self.min_period = if micros == 0 { 1 } else { micros };
        self
    }

    /// Shortest period to arm the hardware with: `min_period`, but never 0.
    pub const fn arm_floor(&self) -> u32 {
        if self.min_period == 0 { 1 } else { self.min_period }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
