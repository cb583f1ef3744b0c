//! Hardware abstraction traits for the timer peripheral.
//!
//! The multiplexer consumes, and never implements, a single countdown
//! peripheral: a free-running microsecond clock, a one-shot timer that
//! raises one interrupt when its period elapses, and a way to mask that
//! interrupt around critical sections. Board support crates implement
//! these traits; [`sim`](crate::sim) provides a software model for tests.

use crate::time::Instant;

/// A free-running microsecond counter that wraps at 32 bits.
pub trait ClockSource {
    /// Returns the current counter value.
    fn now(&self) -> Instant;
}

/// A countdown timer that raises one interrupt per armed period.
pub trait OneShotTimer {
    /// Longest period, in microseconds, the timer can be armed for.
    fn max_period(&self) -> u32;

    /// Arms the timer to interrupt `period` microseconds from now,
    /// replacing any countdown already in progress.
    fn arm(&self, period: u32);

    /// Registers the interrupt handler. Called once by
    /// [`TimerMux::init`](crate::TimerMux::init).
    fn attach(&self, handler: fn());
}

/// Saved interrupt-enable state, returned by
/// [`InterruptMask::save_and_disable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct IrqState(bool);

impl IrqState {
    /// Creates a saved state.
    pub const fn new(was_enabled: bool) -> Self {
        Self(was_enabled)
    }

    /// Returns `true` if interrupts were enabled when the state was saved.
    pub const fn was_enabled(self) -> bool {
        self.0
    }
}

/// Masking of the timer interrupt on the current core.
pub trait InterruptMask {
    /// Disables the interrupt and returns the previous state.
    fn save_and_disable(&self) -> IrqState;

    /// Restores a state returned by [`save_and_disable`](Self::save_and_disable).
    ///
    /// Interrupts are re-enabled only if they were enabled when `state`
    /// was saved, so nested critical sections compose.
    fn restore(&self, state: IrqState);
}

/// Everything the multiplexer needs from the peripheral.
pub trait TimerHardware: ClockSource + OneShotTimer + InterruptMask {}

impl<T: ClockSource + OneShotTimer + InterruptMask + ?Sized> TimerHardware for T {}

impl<T: ClockSource + ?Sized> ClockSource for &T {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

impl<T: OneShotTimer + ?Sized> OneShotTimer for &T {
    fn max_period(&self) -> u32 {
        (**self).max_period()
    }

    fn arm(&self, period: u32) {
        (**self).arm(period);
    }

    fn attach(&self, handler: fn()) {
        (**self).attach(handler);
    }
}

impl<T: InterruptMask + ?Sized> InterruptMask for &T {
    fn save_and_disable(&self) -> IrqState {
        (**self).save_and_disable()
    }

    fn restore(&self, state: IrqState) {
        (**self).restore(state);
    }
}
