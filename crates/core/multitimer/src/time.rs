//! Wrap-tolerant microsecond time.
//!
//! The peripheral clock is a free-running `u32` microsecond counter that
//! wraps roughly every 71.6 minutes. [`Instant`] orders two readings by the
//! sign of their wrapping difference, which is correct as long as they are
//! less than 2^31 µs apart. Every period and delay this crate hands to the
//! hardware is bounded by [`MAX_WRAP_SAFE_PERIOD_US`] to keep that true.

use core::fmt;
use core::time::Duration;

pub use crate::config::MAX_WRAP_SAFE_PERIOD_US;

/// A reading of the peripheral's microsecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Instant(u32);

impl Instant {
    /// The counter value zero.
    pub const ZERO: Self = Self(0);

    /// Creates an `Instant` from a raw counter value.
    pub const fn from_micros(micros: u32) -> Self {
        Self(micros)
    }

    /// Returns the raw counter value.
    pub const fn as_micros(self) -> u32 {
        self.0
    }

    /// Returns the instant `micros` later, wrapping with the counter.
    #[must_use]
    pub const fn wrapping_add(self, micros: u32) -> Self {
        Self(self.0.wrapping_add(micros))
    }

    /// Returns the signed distance from `other` to `self` in microseconds.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn signed_diff(self, other: Self) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// Returns `true` if `self` is strictly earlier than `other`.
    pub const fn is_before(self, other: Self) -> bool {
        self.signed_diff(other) < 0
    }

    /// Returns `true` if a deadline at `self` is due at time `now`.
    pub const fn is_due(self, now: Self) -> bool {
        !now.is_before(self)
    }

    /// Returns the microseconds remaining until `self`, or 0 if already due.
    #[allow(clippy::cast_sign_loss)]
    pub const fn micros_until(self, now: Self) -> u32 {
        let diff = self.signed_diff(now);
        if diff <= 0 { 0 } else { diff as u32 }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Converts a delay to whole microseconds.
///
/// Sub-microsecond remainders are truncated. Returns `None` if the delay
/// does not fit the 32-bit counter at all.
pub fn duration_to_micros(delay: Duration) -> Option<u32> {
    u32::try_from(delay.as_micros()).ok()
}
