//! The timer multiplexer.
//!
//! [`TimerMux`] owns the slot arena, the ordered wait list and the expired
//! queue behind one [`IrqLock`], and drives a single [`TimerHardware`]
//! countdown so it always elapses at (or before) the earliest pending
//! deadline.
//!
//! Three contexts touch it:
//!
//! - normal context calls [`schedule`](TimerMux::schedule),
//!   [`cancel`](TimerMux::cancel) and the deferred runner;
//! - the peripheral interrupt calls [`on_interrupt`](TimerMux::on_interrupt);
//! - immediate callbacks run from inside `on_interrupt` and may themselves
//!   call `schedule` or `cancel`.
//!
//! Every one of these takes the lock for the list splice only and never
//! invokes a callback while holding it.

use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;

use planck_noalloc::vec::ArrayVec;

use crate::config::{Config, MAX_WRAP_SAFE_PERIOD_US, OverlongPolicy};
use crate::error::TimerError;
use crate::hw::TimerHardware;
use crate::list::{ExpiredQueue, WaitList};
use crate::pool::{Callback, Dispatch, Pool, SlotState, TimerHandle};
use crate::sync::IrqLock;
use crate::time::{Instant, duration_to_micros};
use crate::{mtdebug, mtinfo, mttrace, mtwarn};

/// State shared between normal context and the interrupt.
struct Table<P, const N: usize> {
    pool: Pool<P, N>,
    waiting: WaitList,
    expired: ExpiredQueue,
    /// Instant the hardware countdown was last armed to elapse at.
    armed_until: Option<Instant>,
    initialized: bool,
}

impl<P, const N: usize> Table<P, N> {
    const fn new() -> Self {
        Self {
            pool: Pool::new(),
            waiting: WaitList::new(),
            expired: ExpiredQueue::new(),
            armed_until: None,
            initialized: false,
        }
    }

    fn reset(&mut self) {
        self.pool.reset();
        self.waiting.clear();
        self.expired.clear();
        self.armed_until = None;
        self.initialized = true;
    }
}

/// Software timers multiplexed over one hardware one-shot timer.
///
/// `H` is the peripheral, `P` the payload handed to callbacks and `N` the
/// number of timers that can be outstanding at once.
pub struct TimerMux<H, P, const N: usize> {
    hw: H,
    config: Config,
    table: IrqLock<Table<P, N>>,
    expired_count: AtomicUsize,
}

impl<H, P, const N: usize> TimerMux<H, P, N> {
    /// Creates an uninitialized multiplexer.
    ///
    /// Nothing can be scheduled until [`init`](Self::init) has run.
    pub const fn new(hw: H, config: Config) -> Self {
        Self {
            hw,
            config,
            table: IrqLock::new(Table::new()),
            expired_count: AtomicUsize::new(0),
        }
    }

    /// Returns the peripheral.
    pub const fn hardware(&self) -> &H {
        &self.hw
    }

    /// Returns the runtime configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Total number of timer slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of deferred timers that are due but have not run yet.
    ///
    /// Lock-free; safe to poll from anywhere.
    pub fn expired_count(&self) -> usize {
        self.expired_count.load(Ordering::Acquire)
    }
}

impl<H: TimerHardware, P, const N: usize> TimerMux<H, P, N> {
    /// Longest delay a single timer can be scheduled for, in microseconds.
    ///
    /// The smaller of the peripheral limit and the range over which
    /// wrapping instants still compare correctly.
    pub fn max_period(&self) -> u32 {
        self.hw.max_period().min(MAX_WRAP_SAFE_PERIOD_US)
    }

    /// Resets every slot, attaches `handler` to the peripheral interrupt
    /// and arms the countdown for the maximum period.
    ///
    /// `handler` must call [`on_interrupt`](Self::on_interrupt). Calling
    /// `init` again discards all outstanding timers without running them;
    /// handles issued before the reset become invalid.
    pub fn init(&self, handler: fn()) {
        let max = self.max_period();
        {
            let mut table = self.table.lock(&self.hw);
            table.reset();
            self.expired_count.store(0, Ordering::Release);
            self.hw.attach(handler);
            self.hw.arm(max);
            table.armed_until = Some(self.hw.now().wrapping_add(max));
        }
        mtinfo!("multitimer: {} slots, max period {}us", N, max);
    }

    /// Schedules `func(payload)` to run `delay` from now.
    ///
    /// The delay is truncated to whole microseconds. A delay longer than
    /// [`max_period`](Self::max_period) is handled per
    /// [`Config::overlong`].
    ///
    /// # Errors
    ///
    /// - [`TimerError::NotInitialized`] before [`init`](Self::init).
    /// - [`TimerError::OverlongDelay`] if the delay is too long and the
    ///   policy is [`OverlongPolicy::Reject`].
    /// - [`TimerError::CapacityExhausted`] if all `N` slots are in use.
    ///
    /// Nothing changes on error; the payload is dropped.
    pub fn schedule(
        &self,
        delay: Duration,
        dispatch: Dispatch,
        func: fn(P),
        payload: P,
    ) -> Result<TimerHandle, TimerError> {
        let mut table = self.table.lock(&self.hw);
        if !table.initialized {
            return Err(TimerError::NotInitialized);
        }
        let micros = self.checked_delay(delay)?;

        let now = self.hw.now();
        let deadline = now.wrapping_add(micros);
        let Table { pool, waiting, .. } = &mut *table;
        let Some(handle) = pool.allocate(deadline, dispatch, Callback::new(func, payload)) else {
            mtwarn!("multitimer: all {} slots in use", N);
            return Err(TimerError::CapacityExhausted);
        };
        waiting.insert(pool, handle.slot());

        if table.armed_until.is_none_or(|at| deadline.is_before(at)) {
            let period = micros.max(self.config.arm_floor()).min(self.max_period());
            self.hw.arm(period);
            table.armed_until = Some(now.wrapping_add(period));
        }

        mttrace!(
            "multitimer: {} {:?} due at {}",
            handle.slot(),
            dispatch,
            deadline
        );
        Ok(handle)
    }

    fn checked_delay(&self, delay: Duration) -> Result<u32, TimerError> {
        let max = self.max_period();
        let requested = duration_to_micros(delay).unwrap_or(u32::MAX);
        if requested <= max {
            return Ok(requested);
        }
        match self.config.overlong {
            OverlongPolicy::Reject => {
                mtwarn!("multitimer: rejected {}us delay (max {}us)", requested, max);
                Err(TimerError::OverlongDelay { requested, max })
            }
            OverlongPolicy::Clamp => {
                mtwarn!("multitimer: clamped {}us delay to {}us", requested, max);
                Ok(max)
            }
        }
    }

    /// Cancels a timer that has not run yet.
    ///
    /// Works on pending timers and on deferred timers that are due but
    /// still waiting for the runner. The callback never runs and the
    /// payload is dropped. The hardware is left armed; if it fires early it
    /// finds nothing due and re-arms.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidHandle`] if the timer already ran, was
    /// cancelled, or was discarded by [`init`](Self::init).
    pub fn cancel(&self, handle: TimerHandle) -> Result<(), TimerError> {
        let mut table = self.table.lock(&self.hw);
        let Table {
            pool,
            waiting,
            expired,
            ..
        } = &mut *table;
        let Some(id) = pool.resolve(handle) else {
            drop(table);
            mtdebug!("multitimer: cancel of inactive handle {:?}", handle);
            return Err(TimerError::InvalidHandle);
        };
        match pool.state(id) {
            SlotState::Pending => {
                waiting.remove(pool, id);
            }
            SlotState::Expired => {
                expired.remove(pool, id);
                self.expired_count.fetch_sub(1, Ordering::AcqRel);
            }
            SlotState::Free => return Err(TimerError::InvalidHandle),
        }
        let callback = pool.release(id);
        drop(table);
        drop(callback);
        mttrace!("multitimer: cancelled {}", id);
        Ok(())
    }

    /// Expiry detector. Call from the peripheral's interrupt handler.
    ///
    /// Moves every due timer off the wait list, queues deferred ones for
    /// the runner, re-arms the hardware for the next deadline, and then,
    /// with the lock released, runs the due immediate callbacks in expiry
    /// order.
    pub fn on_interrupt(&self) {
        let mut batch = ArrayVec::<Callback<P>, N>::new();

        {
            let mut table = self.table.lock(&self.hw);
            let now = self.hw.now();
            let Table {
                pool,
                waiting,
                expired,
                armed_until,
                ..
            } = &mut *table;

            let mut deferred = 0;
            while waiting
                .front()
                .is_some_and(|id| pool.deadline(id).is_due(now))
            {
                let Some(id) = waiting.pop_front(pool) else {
                    break;
                };
                match pool.dispatch(id) {
                    Dispatch::Immediate => {
                        if let Some(callback) = pool.release(id) {
                            batch.push(callback);
                        }
                    }
                    Dispatch::Deferred => {
                        pool.mark_expired(id);
                        expired.push_back(pool, id);
                        deferred += 1;
                    }
                }
            }
            if deferred > 0 {
                self.expired_count.fetch_add(deferred, Ordering::AcqRel);
            }

            let max = self.max_period();
            let period = waiting.front().map_or(max, |id| {
                pool.deadline(id)
                    .micros_until(now)
                    .max(self.config.arm_floor())
                    .min(max)
            });
            self.hw.arm(period);
            *armed_until = Some(now.wrapping_add(period));

            mttrace!(
                "multitimer: at {} ran {} immediate, queued {} deferred, next in {}us",
                now,
                batch.len(),
                deferred,
                period
            );
        }

        // Filled front to back; reversed so popping yields expiry order.
        batch.reverse();
        while let Some(callback) = batch.pop() {
            callback.invoke();
        }
    }

    /// Runs the oldest due deferred callback, with interrupts in whatever
    /// state the caller had them.
    ///
    /// Returns `false` if nothing was due.
    pub fn run_next_expired(&self) -> bool {
        let mut table = self.table.lock(&self.hw);
        let Table { pool, expired, .. } = &mut *table;
        let Some(id) = expired.pop_front(pool) else {
            return false;
        };
        let callback = pool.release(id);
        self.expired_count.fetch_sub(1, Ordering::AcqRel);
        drop(table);

        mttrace!("multitimer: running deferred {}", id);
        if let Some(callback) = callback {
            callback.invoke();
        }
        true
    }

    /// Runs deferred callbacks until none are due. Returns how many ran.
    ///
    /// Timers that become due while this runs (including ones scheduled by
    /// the callbacks themselves) are picked up too.
    pub fn run_all_expired(&self) -> usize {
        let mut ran = 0;
        while self.run_next_expired() {
            ran += 1;
        }
        ran
    }

    /// Number of timers waiting for their deadline.
    pub fn pending_count(&self) -> usize {
        self.table.lock(&self.hw).waiting.len()
    }

    /// Number of unused slots.
    pub fn free_count(&self) -> usize {
        self.table.lock(&self.hw).pool.free_count()
    }

    /// Returns where a timer is in its lifecycle, or `None` if the handle
    /// no longer refers to an outstanding timer.
    pub fn state(&self, handle: TimerHandle) -> Option<SlotState> {
        let table = self.table.lock(&self.hw);
        table.pool.resolve(handle).map(|id| table.pool.state(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicU32};
    use crate::config::DEFAULT_CAPACITY;
    use crate::hw::ClockSource;
    use crate::sim::{SimFlags, SimTimer, detached_handler, run_for};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<u32>>>;
    type Mux<'a, const N: usize> = TimerMux<&'a SimTimer, (Log, u32), N>;

    fn record(p: (Log, u32)) {
        p.0.borrow_mut().push(p.1);
    }

    fn ready<const N: usize>(sim: &SimTimer, config: Config) -> Mux<'_, N> {
        let mux = TimerMux::new(sim, config);
        mux.init(detached_handler);
        mux
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn micros(us: u64) -> Duration {
        Duration::from_micros(us)
    }

    #[test]
    fn init_arms_for_max_period() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        assert_eq!(sim.last_period(), 8_000_000);
        assert!(sim.flags().contains(SimFlags::HANDLER_ATTACHED));
        assert_eq!(mux.free_count(), 3);
        assert_eq!(mux.pending_count(), 0);
        assert_eq!(mux.expired_count(), 0);
    }

    #[test]
    fn deferred_timers_fire_in_deadline_order() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        let log = Log::default();

        let a = mux.schedule(secs(5), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        let b = mux.schedule(secs(2), Dispatch::Deferred, record, (log.clone(), 2)).unwrap();
        let c = mux.schedule(secs(8), Dispatch::Deferred, record, (log.clone(), 3)).unwrap();
        assert_eq!(sim.armed_deadline(), Some(Instant::from_micros(2_000_000)));

        run_for(&mux, 2_000_000);
        assert_eq!(mux.expired_count(), 1);
        assert_eq!(mux.state(b), Some(SlotState::Expired));
        assert_eq!(mux.state(a), Some(SlotState::Pending));
        assert_eq!(mux.state(c), Some(SlotState::Pending));
        assert_eq!(sim.last_period(), 3_000_000);
        assert!(log.borrow().is_empty());

        assert!(mux.run_next_expired());
        assert_eq!(*log.borrow(), vec![2]);
        assert_eq!(mux.expired_count(), 0);
        assert_eq!(mux.state(b), None);
        assert!(!mux.run_next_expired());

        run_for(&mux, 6_000_000);
        assert_eq!(mux.run_all_expired(), 2);
        assert_eq!(*log.borrow(), vec![2, 1, 3]);
        assert_eq!(mux.free_count(), 3);
    }

    #[test]
    fn immediate_timer_runs_inside_interrupt() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        let log = Log::default();

        let d = mux
            .schedule(Duration::ZERO, Dispatch::Immediate, record, (log.clone(), 4))
            .unwrap();
        assert_eq!(sim.last_period(), 1);

        run_for(&mux, 1);
        assert_eq!(*log.borrow(), vec![4]);
        assert_eq!(mux.expired_count(), 0);
        assert_eq!(mux.free_count(), 3);
        assert_eq!(mux.state(d), None);
        assert_eq!(mux.run_all_expired(), 0);
    }

    #[test]
    fn capacity_exhausted_leaves_state_unchanged() {
        let sim = SimTimer::new();
        let mux = ready::<1>(&sim, Config::DEFAULT);
        let log = Log::default();

        let first = mux
            .schedule(micros(100), Dispatch::Deferred, record, (log.clone(), 1))
            .unwrap();
        let arms = sim.arm_count();
        let err = mux.schedule(micros(10), Dispatch::Deferred, record, (log.clone(), 2));
        assert_eq!(err, Err(TimerError::CapacityExhausted));
        assert_eq!(sim.arm_count(), arms);
        assert_eq!(mux.pending_count(), 1);
        assert_eq!(mux.free_count(), 0);
        assert!(sim.interrupts_enabled());

        run_for(&mux, 100);
        assert_eq!(mux.state(first), Some(SlotState::Expired));
        assert_eq!(mux.run_all_expired(), 1);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn default_capacity_fills_then_refuses() {
        let sim = SimTimer::new();
        let mux = ready::<DEFAULT_CAPACITY>(&sim, Config::DEFAULT);
        let log = Log::default();
        for tag in 0..10 {
            mux.schedule(micros(5), Dispatch::Immediate, record, (log.clone(), tag)).unwrap();
        }
        assert_eq!(mux.capacity(), 10);
        assert_eq!(
            mux.schedule(micros(5), Dispatch::Immediate, record, (log.clone(), 10)),
            Err(TimerError::CapacityExhausted)
        );
        run_for(&mux, 5);
        assert_eq!(*log.borrow(), (0..10).rev().collect::<Vec<_>>());
        assert_eq!(mux.free_count(), DEFAULT_CAPACITY);
    }

    #[test]
    fn mixed_delays_run_sorted() {
        let sim = SimTimer::new();
        let mux = ready::<5>(&sim, Config::DEFAULT);
        let log = Log::default();
        for delay in [50, 10, 40, 20, 30] {
            mux.schedule(micros(delay.into()), Dispatch::Deferred, record, (log.clone(), delay))
                .unwrap();
        }
        run_for(&mux, 100);
        assert_eq!(mux.expired_count(), 5);
        assert_eq!(mux.run_all_expired(), 5);
        assert_eq!(*log.borrow(), vec![10, 20, 30, 40, 50]);
        assert_eq!(mux.expired_count(), 0);
    }

    #[test]
    fn equal_deadlines_run_newest_first() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        let log = Log::default();
        mux.schedule(micros(30), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        mux.schedule(micros(30), Dispatch::Deferred, record, (log.clone(), 2)).unwrap();
        run_for(&mux, 30);
        mux.run_all_expired();
        assert_eq!(*log.borrow(), vec![2, 1]);
    }

    #[test]
    fn immediate_and_deferred_share_one_interrupt() {
        let sim = SimTimer::new();
        let mux = ready::<4>(&sim, Config::DEFAULT);
        let log = Log::default();
        mux.schedule(micros(10), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        mux.schedule(micros(10), Dispatch::Immediate, record, (log.clone(), 2)).unwrap();
        mux.schedule(micros(10), Dispatch::Immediate, record, (log.clone(), 3)).unwrap();
        let arms = sim.arm_count();

        run_for(&mux, 10);
        assert_eq!(sim.arm_count(), arms + 1);
        assert_eq!(*log.borrow(), vec![3, 2]);
        assert_eq!(mux.expired_count(), 1);
        assert_eq!(mux.run_all_expired(), 1);
        assert_eq!(*log.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn earlier_deadline_rearms_hardware() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        let log = Log::default();

        mux.schedule(secs(5), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        assert_eq!(sim.last_period(), 5_000_000);
        mux.schedule(secs(1), Dispatch::Deferred, record, (log.clone(), 2)).unwrap();
        assert_eq!(sim.last_period(), 1_000_000);

        let arms = sim.arm_count();
        mux.schedule(secs(3), Dispatch::Deferred, record, (log.clone(), 3)).unwrap();
        assert_eq!(sim.arm_count(), arms);
        assert_eq!(sim.armed_deadline(), Some(Instant::from_micros(1_000_000)));
    }

    #[test]
    fn min_period_floors_short_arms() {
        let sim = SimTimer::new();
        let mux = ready::<2>(&sim, Config::DEFAULT.with_min_period(50));
        assert_eq!(mux.config().min_period, 50);
        let log = Log::default();
        mux.schedule(micros(5), Dispatch::Immediate, record, (log.clone(), 1)).unwrap();
        assert_eq!(sim.last_period(), 50);
        run_for(&mux, 49);
        assert!(log.borrow().is_empty());
        run_for(&mux, 1);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn zero_min_period_field_still_arms_one_micro() {
        let sim = SimTimer::new();
        let config = Config {
            min_period: 0,
            ..Config::DEFAULT
        };
        let mux = ready::<2>(&sim, config);
        let log = Log::default();
        mux.schedule(Duration::ZERO, Dispatch::Immediate, record, (log.clone(), 1)).unwrap();
        assert_eq!(sim.last_period(), 1);
        run_for(&mux, 1);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn cancel_pending_prevents_callback() {
        let sim = SimTimer::new();
        let mux = ready::<2>(&sim, Config::DEFAULT);
        let log = Log::default();

        let h = mux.schedule(micros(100), Dispatch::Immediate, record, (log.clone(), 1)).unwrap();
        let arms = sim.arm_count();
        assert_eq!(mux.cancel(h), Ok(()));
        assert_eq!(sim.arm_count(), arms);
        assert_eq!(mux.state(h), None);
        assert_eq!(mux.free_count(), 2);
        assert_eq!(Rc::strong_count(&log), 1);

        // The stale countdown still fires, finds nothing, and re-arms.
        run_for(&mux, 100);
        assert!(log.borrow().is_empty());
        assert_eq!(sim.last_period(), 8_000_000);
        assert_eq!(mux.cancel(h), Err(TimerError::InvalidHandle));
    }

    #[test]
    fn cancel_expired_drops_it_from_queue() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        let log = Log::default();

        let a = mux.schedule(micros(10), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        mux.schedule(micros(20), Dispatch::Deferred, record, (log.clone(), 2)).unwrap();
        run_for(&mux, 20);
        assert_eq!(mux.expired_count(), 2);

        assert_eq!(mux.cancel(a), Ok(()));
        assert_eq!(mux.expired_count(), 1);
        assert_eq!(mux.run_all_expired(), 1);
        assert_eq!(*log.borrow(), vec![2]);
        assert_eq!(mux.free_count(), 3);
    }

    #[test]
    fn cancel_after_run_is_invalid() {
        let sim = SimTimer::new();
        let mux = ready::<1>(&sim, Config::DEFAULT);
        let log = Log::default();

        let old = mux.schedule(micros(10), Dispatch::Immediate, record, (log.clone(), 1)).unwrap();
        run_for(&mux, 10);
        assert_eq!(mux.cancel(old), Err(TimerError::InvalidHandle));
        assert!(sim.interrupts_enabled());

        // The slot is reused; the old handle must not reach the new timer.
        let new = mux.schedule(micros(10), Dispatch::Deferred, record, (log.clone(), 2)).unwrap();
        assert_eq!(new.slot(), old.slot());
        assert_eq!(mux.cancel(old), Err(TimerError::InvalidHandle));
        assert_eq!(mux.state(new), Some(SlotState::Pending));
    }

    #[test]
    fn deadlines_survive_clock_wrap() {
        let sim = SimTimer::new().starting_at(u32::MAX - 100);
        let mux = ready::<2>(&sim, Config::DEFAULT);
        let log = Log::default();

        mux.schedule(micros(200), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        assert_eq!(sim.armed_deadline(), Some(Instant::from_micros(99)));
        run_for(&mux, 150);
        assert_eq!(mux.expired_count(), 0);
        run_for(&mux, 50);
        assert_eq!(mux.expired_count(), 1);
        assert_eq!(sim.now().as_micros(), 99);
    }

    #[test]
    fn overlong_delay_rejected() {
        let sim = SimTimer::new();
        let mux = ready::<2>(&sim, Config::DEFAULT);
        let log = Log::default();
        let err = mux.schedule(secs(9), Dispatch::Deferred, record, (log.clone(), 1));
        assert_eq!(
            err,
            Err(TimerError::OverlongDelay {
                requested: 9_000_000,
                max: 8_000_000
            })
        );
        assert_eq!(mux.free_count(), 2);
        assert!(sim.interrupts_enabled());

        let err = mux.schedule(secs(100_000), Dispatch::Deferred, record, (log, 1));
        assert!(matches!(
            err,
            Err(TimerError::OverlongDelay {
                requested: u32::MAX,
                ..
            })
        ));
    }

    #[test]
    fn overlong_delay_clamped() {
        let sim = SimTimer::new().with_max_period(1_000);
        let config = Config::DEFAULT.with_overlong(OverlongPolicy::Clamp);
        let mux = ready::<2>(&sim, config);
        let log = Log::default();

        mux.schedule(secs(3), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        run_for(&mux, 999);
        assert_eq!(mux.expired_count(), 0);
        run_for(&mux, 1);
        assert_eq!(mux.expired_count(), 1);
    }

    #[test]
    fn max_period_capped_to_wrap_safe_range() {
        let sim = SimTimer::new().with_max_period(u32::MAX);
        let mux: Mux<'_, 1> = TimerMux::new(&sim, Config::DEFAULT);
        assert_eq!(mux.max_period(), MAX_WRAP_SAFE_PERIOD_US);
    }

    #[test]
    fn schedule_before_init_fails() {
        let sim = SimTimer::new();
        let mux: Mux<'_, 2> = TimerMux::new(&sim, Config::DEFAULT);
        let log = Log::default();
        let err = mux.schedule(micros(10), Dispatch::Deferred, record, (log, 1));
        assert_eq!(err, Err(TimerError::NotInitialized));
        assert_eq!(sim.arm_count(), 0);
        assert!(!mux.run_next_expired());
        assert!(sim.interrupts_enabled());
    }

    #[test]
    fn reinit_discards_outstanding_timers() {
        let sim = SimTimer::new();
        let mux = ready::<3>(&sim, Config::DEFAULT);
        let log = Log::default();

        let a = mux.schedule(micros(10), Dispatch::Deferred, record, (log.clone(), 1)).unwrap();
        mux.schedule(micros(50), Dispatch::Deferred, record, (log.clone(), 2)).unwrap();
        run_for(&mux, 10);
        assert_eq!(mux.expired_count(), 1);

        mux.init(detached_handler);
        assert_eq!(mux.expired_count(), 0);
        assert_eq!(mux.pending_count(), 0);
        assert_eq!(mux.free_count(), 3);
        assert_eq!(mux.state(a), None);
        assert_eq!(Rc::strong_count(&log), 1);

        run_for(&mux, 100);
        assert_eq!(mux.run_all_expired(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn interrupt_masking_around_callbacks() {
        static SIM: SimTimer = SimTimer::new();
        static MUX: TimerMux<&SimTimer, u32, 4> = TimerMux::new(&SIM, Config::DEFAULT);
        static IMMEDIATE_MASKED: AtomicBool = AtomicBool::new(false);
        static DEFERRED_UNMASKED: AtomicBool = AtomicBool::new(false);

        fn isr() {
            MUX.on_interrupt();
        }

        fn probe(kind: u32) {
            let enabled = SIM.interrupts_enabled();
            if kind == 0 {
                IMMEDIATE_MASKED.store(!enabled && SIM.in_handler(), Ordering::Relaxed);
            } else {
                DEFERRED_UNMASKED.store(enabled && !SIM.in_handler(), Ordering::Relaxed);
            }
        }

        MUX.init(isr);
        MUX.schedule(micros(10), Dispatch::Immediate, probe, 0).unwrap();
        MUX.schedule(micros(20), Dispatch::Deferred, probe, 1).unwrap();
        SIM.advance(30);

        assert!(IMMEDIATE_MASKED.load(Ordering::Relaxed));
        assert!(!DEFERRED_UNMASKED.load(Ordering::Relaxed));
        assert_eq!(MUX.expired_count(), 1);

        assert_eq!(MUX.run_all_expired(), 1);
        assert!(DEFERRED_UNMASKED.load(Ordering::Relaxed));
        assert!(SIM.interrupts_enabled());
    }

    #[test]
    fn immediate_callback_reschedules_itself() {
        static SIM: SimTimer = SimTimer::new();
        static MUX: TimerMux<&SimTimer, u32, 1> = TimerMux::new(&SIM, Config::DEFAULT);
        static FIRED: AtomicU32 = AtomicU32::new(0);

        fn isr() {
            MUX.on_interrupt();
        }

        fn again(left: u32) {
            FIRED.fetch_add(1, Ordering::Relaxed);
            if left > 0 {
                MUX.schedule(micros(100), Dispatch::Immediate, again, left - 1)
                    .unwrap();
            }
        }

        MUX.init(isr);
        MUX.schedule(micros(100), Dispatch::Immediate, again, 3).unwrap();
        SIM.advance(1_000);

        assert_eq!(FIRED.load(Ordering::Relaxed), 4);
        assert_eq!(MUX.pending_count(), 0);
        assert_eq!(MUX.free_count(), 1);
        assert_eq!(SIM.last_period(), 8_000_000);
    }

    #[test]
    fn deferred_callback_reschedules_itself() {
        static SIM: SimTimer = SimTimer::new();
        static MUX: TimerMux<&SimTimer, u32, 2> = TimerMux::new(&SIM, Config::DEFAULT);
        static FIRED: AtomicU32 = AtomicU32::new(0);

        fn isr() {
            MUX.on_interrupt();
        }

        fn again(left: u32) {
            FIRED.fetch_add(1, Ordering::Relaxed);
            if left > 0 {
                MUX.schedule(micros(10), Dispatch::Deferred, again, left - 1)
                    .unwrap();
            }
        }

        MUX.init(isr);
        MUX.schedule(micros(10), Dispatch::Deferred, again, 2).unwrap();
        SIM.advance(10);
        assert_eq!(MUX.run_all_expired(), 1);
        assert_eq!(MUX.pending_count(), 1);

        SIM.advance(10);
        assert_eq!(MUX.run_all_expired(), 1);
        SIM.advance(10);
        assert_eq!(MUX.run_all_expired(), 1);
        assert_eq!(FIRED.load(Ordering::Relaxed), 3);
        assert_eq!(MUX.free_count(), 2);
    }
}
