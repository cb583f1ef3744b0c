//! Software model of the timer peripheral.
//!
//! [`SimTimer`] implements every [`hw`](crate::hw) trait on top of atomics
//! so it can back a `static` multiplexer as well as a stack-local one. It
//! models the behaviour the multiplexer depends on:
//!
//! - a 32-bit microsecond clock that only moves when told to, and wraps;
//! - a one-shot countdown that raises exactly one interrupt per `arm`;
//! - an interrupt-enable bit, cleared for the duration of the handler;
//! - a latched pending interrupt when the countdown elapses while masked,
//!   delivered on the next step once interrupts are enabled again.
//!
//! Time moves through [`SimTimer::advance`], which invokes the handler
//! registered with [`OneShotTimer::attach`], or [`SimTimer::drive`], which
//! invokes a caller-supplied closure instead. [`run_for`] wires `drive` to a
//! borrowed [`TimerMux`].

use core::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::config::DEFAULT_MAX_PERIOD_US;
use crate::hw::{ClockSource, InterruptMask, IrqState, OneShotTimer};
use crate::mux::TimerMux;
use crate::time::Instant;

bitflags! {
    /// Simulated peripheral status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SimFlags: u8 {
        /// A countdown is in progress.
        const ARMED            = 1 << 0;
        /// The timer interrupt is unmasked.
        const IRQ_ENABLED      = 1 << 1;
        /// The countdown elapsed while masked; interrupt not yet delivered.
        const IRQ_PENDING      = 1 << 2;
        /// A handler was registered through `attach`.
        const HANDLER_ATTACHED = 1 << 3;
        /// The interrupt handler is currently running.
        const IN_HANDLER       = 1 << 4;
    }
}

/// Handler to pass to [`TimerMux::init`] when the mux is stepped with
/// [`run_for`] / [`SimTimer::drive`] rather than through a `static`.
pub fn detached_handler() {}

/// Simulated one-shot timer peripheral.
pub struct SimTimer {
    now: AtomicU32,
    deadline: AtomicU32,
    max_period: u32,
    flags: AtomicU8,
    handler: AtomicPtr<()>,
    arm_count: AtomicU32,
    last_period: AtomicU32,
}

impl SimTimer {
    /// Creates a peripheral at time zero with interrupts enabled and the
    /// reference 8 s maximum period.
    pub const fn new() -> Self {
        Self {
            now: AtomicU32::new(0),
            deadline: AtomicU32::new(0),
            max_period: DEFAULT_MAX_PERIOD_US,
            flags: AtomicU8::new(SimFlags::IRQ_ENABLED.bits()),
            handler: AtomicPtr::new(core::ptr::null_mut()),
            arm_count: AtomicU32::new(0),
            last_period: AtomicU32::new(0),
        }
    }

    /// Returns a copy with a different maximum period.
    #[must_use]
    pub const fn with_max_period(mut self, micros: u32) -> Self {
        self.max_period = micros;
        self
    }

    /// Returns a copy whose clock starts at `micros`.
    #[must_use]
    pub const fn starting_at(self, micros: u32) -> Self {
        Self {
            now: AtomicU32::new(micros),
            ..self
        }
    }

    /// Returns the status register.
    pub fn flags(&self) -> SimFlags {
        SimFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn set(&self, flags: SimFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    fn clear(&self, flags: SimFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Returns `true` if the timer interrupt is unmasked.
    pub fn interrupts_enabled(&self) -> bool {
        self.flags().contains(SimFlags::IRQ_ENABLED)
    }

    /// Returns `true` while the interrupt handler is running.
    pub fn in_handler(&self) -> bool {
        self.flags().contains(SimFlags::IN_HANDLER)
    }

    /// Returns `true` if an elapsed countdown is waiting for interrupts to
    /// be unmasked.
    pub fn is_pending(&self) -> bool {
        self.flags().contains(SimFlags::IRQ_PENDING)
    }

    /// Returns the instant the countdown will elapse, if armed.
    pub fn armed_deadline(&self) -> Option<Instant> {
        self.flags()
            .contains(SimFlags::ARMED)
            .then(|| Instant::from_micros(self.deadline.load(Ordering::Acquire)))
    }

    /// Number of times the timer has been armed.
    pub fn arm_count(&self) -> u32 {
        self.arm_count.load(Ordering::Relaxed)
    }

    /// Period passed to the most recent `arm`.
    pub fn last_period(&self) -> u32 {
        self.last_period.load(Ordering::Relaxed)
    }

    /// Advances the clock, invoking the attached handler at every elapsed
    /// countdown. Without a handler, elapsed countdowns stay pending.
    pub fn advance(&self, micros: u32) {
        if self.flags().contains(SimFlags::HANDLER_ATTACHED) {
            let handler = self.load_handler();
            self.step(micros, &mut Some(handler));
        } else {
            self.step(micros, &mut None::<fn()>);
        }
    }

    /// Advances the clock, calling `fire` at every elapsed countdown in
    /// place of the attached handler.
    pub fn drive(&self, micros: u32, fire: impl FnMut()) {
        self.step(micros, &mut Some(fire));
    }

    fn load_handler(&self) -> fn() {
        let ptr = self.handler.load(Ordering::Acquire);
        // SAFETY: Only called once `HANDLER_ATTACHED` is set, after `attach`
        // stored a valid `fn()` pointer.
        unsafe { core::mem::transmute::<*mut (), fn()>(ptr) }
    }

    fn step<F: FnMut()>(&self, micros: u32, fire: &mut Option<F>) {
        if self.is_pending() {
            self.raise(fire);
        }

        let mut remaining = micros;
        loop {
            if self.flags().contains(SimFlags::ARMED) {
                let now = self.now.load(Ordering::Acquire);
                let until = self.deadline.load(Ordering::Acquire).wrapping_sub(now);
                if until <= remaining {
                    self.now.store(now.wrapping_add(until), Ordering::Release);
                    remaining -= until;
                    self.clear(SimFlags::ARMED);
                    self.raise(fire);
                    continue;
                }
            }
            self.now.fetch_add(remaining, Ordering::AcqRel);
            break;
        }
    }

    /// Delivers the interrupt, or latches it if masked or nothing is
    /// listening.
    fn raise<F: FnMut()>(&self, fire: &mut Option<F>) {
        let Some(fire) = fire else {
            self.set(SimFlags::IRQ_PENDING);
            return;
        };
        if !self.interrupts_enabled() {
            self.set(SimFlags::IRQ_PENDING);
            return;
        }
        loop {
            self.clear(SimFlags::IRQ_PENDING | SimFlags::IRQ_ENABLED);
            self.set(SimFlags::IN_HANDLER);
            fire();
            self.clear(SimFlags::IN_HANDLER);
            self.set(SimFlags::IRQ_ENABLED);
            if !self.is_pending() {
                break;
            }
        }
    }
}

impl Default for SimTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SimTimer {
    fn now(&self) -> Instant {
        Instant::from_micros(self.now.load(Ordering::Acquire))
    }
}

impl OneShotTimer for SimTimer {
    fn max_period(&self) -> u32 {
        self.max_period
    }

    fn arm(&self, period: u32) {
        let now = self.now.load(Ordering::Acquire);
        self.deadline.store(now.wrapping_add(period), Ordering::Release);
        self.last_period.store(period, Ordering::Relaxed);
        self.arm_count.fetch_add(1, Ordering::Relaxed);
        self.set(SimFlags::ARMED);
    }

    fn attach(&self, handler: fn()) {
        self.handler.store(handler as *mut (), Ordering::Release);
        self.set(SimFlags::HANDLER_ATTACHED);
    }
}

impl InterruptMask for SimTimer {
    fn save_and_disable(&self) -> IrqState {
        let prev = self.flags.fetch_and(!SimFlags::IRQ_ENABLED.bits(), Ordering::AcqRel);
        IrqState::new(prev & SimFlags::IRQ_ENABLED.bits() != 0)
    }

    fn restore(&self, state: IrqState) {
        if state.was_enabled() {
            self.set(SimFlags::IRQ_ENABLED);
        }
    }
}

/// Advances `mux`'s simulated clock by `micros`, running the detector at
/// every elapsed countdown.
pub fn run_for<P, const N: usize>(mux: &TimerMux<&SimTimer, P, N>, micros: u32) {
    mux.hardware().drive(micros, || mux.on_interrupt());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn starts_enabled_and_unarmed() {
        let sim = SimTimer::new();
        assert!(sim.interrupts_enabled());
        assert_eq!(sim.armed_deadline(), None);
        assert_eq!(sim.now(), Instant::ZERO);
        assert_eq!(sim.max_period(), DEFAULT_MAX_PERIOD_US);
    }

    #[test]
    fn fires_once_per_arm() {
        let sim = SimTimer::new();
        let fired = Cell::new(0);
        sim.arm(100);
        sim.drive(250, || fired.set(fired.get() + 1));
        assert_eq!(fired.get(), 1);
        assert_eq!(sim.now().as_micros(), 250);
        assert_eq!(sim.armed_deadline(), None);
    }

    #[test]
    fn rearm_from_handler_fires_again() {
        let sim = SimTimer::new();
        let times = std::cell::RefCell::new(Vec::new());
        sim.arm(100);
        sim.drive(350, || {
            times.borrow_mut().push(sim.now().as_micros());
            assert!(sim.in_handler());
            assert!(!sim.interrupts_enabled());
            sim.arm(100);
        });
        assert_eq!(*times.borrow(), vec![100, 200, 300]);
        assert!(sim.interrupts_enabled());
        assert_eq!(sim.armed_deadline(), Some(Instant::from_micros(400)));
    }

    #[test]
    fn masked_interrupt_latches_until_next_step() {
        let sim = SimTimer::new();
        let fired = Cell::new(0);
        sim.arm(10);
        let saved = sim.save_and_disable();
        sim.drive(20, || fired.set(fired.get() + 1));
        assert_eq!(fired.get(), 0);
        assert!(sim.is_pending());
        sim.restore(saved);
        sim.drive(0, || fired.set(fired.get() + 1));
        assert_eq!(fired.get(), 1);
        assert!(!sim.is_pending());
    }

    #[test]
    fn clock_wraps() {
        let sim = SimTimer::new().starting_at(u32::MAX - 5);
        sim.arm(10);
        assert_eq!(sim.armed_deadline(), Some(Instant::from_micros(4)));
        let fired = Cell::new(false);
        sim.drive(10, || fired.set(true));
        assert!(fired.get());
        assert_eq!(sim.now().as_micros(), 4);
    }

    #[test]
    fn advance_without_handler_latches() {
        let sim = SimTimer::new();
        sim.arm(5);
        sim.advance(10);
        assert!(sim.is_pending());
        assert_eq!(sim.now().as_micros(), 10);
    }

    #[test]
    fn records_arm_history() {
        let sim = SimTimer::new().with_max_period(1_000);
        sim.arm(300);
        sim.arm(40);
        assert_eq!(sim.arm_count(), 2);
        assert_eq!(sim.last_period(), 40);
        assert_eq!(sim.max_period(), 1_000);
    }
}
