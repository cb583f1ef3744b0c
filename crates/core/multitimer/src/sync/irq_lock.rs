//! Interrupt-masking lock.
//!
//! Masks the timer interrupt through an [`InterruptMask`] before taking the
//! inner flag and restores the previous interrupt state when the guard is
//! dropped. Because restoration lives in `Drop`, every exit path out of a
//! critical section (including early returns and `?`) re-enables interrupts
//! exactly when they were enabled on entry.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::hw::{InterruptMask, IrqState};

/// A lock that masks the timer interrupt while held.
pub struct IrqLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: The atomic flag plus interrupt masking ensure exclusive access.
unsafe impl<T: Send> Send for IrqLock<T> {}
unsafe impl<T: Send> Sync for IrqLock<T> {}

impl<T> IrqLock<T> {
    /// Creates a new unlocked `IrqLock`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, masking interrupts first.
    pub fn lock<'a, M: InterruptMask + ?Sized>(&'a self, mask: &'a M) -> IrqLockGuard<'a, T, M> {
        let saved = mask.save_and_disable();

        // TTAS spin to acquire. With the interrupt masked on a single core
        // the flag is always free here.
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return IrqLockGuard {
                    lock: self,
                    mask,
                    saved,
                    _not_send: PhantomData,
                };
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }
}

/// RAII guard that restores interrupt state on drop.
///
/// Not `Send`: interrupt state belongs to the core that saved it.
pub struct IrqLockGuard<'a, T, M: InterruptMask + ?Sized> {
    lock: &'a IrqLock<T>,
    mask: &'a M,
    saved: IrqState,
    _not_send: PhantomData<*const ()>,
}

impl<T, M: InterruptMask + ?Sized> Deref for IrqLockGuard<'_, T, M> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: The lock is held, so we have exclusive access to the data.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, M: InterruptMask + ?Sized> DerefMut for IrqLockGuard<'_, T, M> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The lock is held, so we have exclusive access to the data.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, M: InterruptMask + ?Sized> Drop for IrqLockGuard<'_, T, M> {
    fn drop(&mut self) {
        // Release before unmasking: a latched interrupt delivered by
        // `restore` must find the lock free.
        self.lock.locked.store(false, Ordering::Release);
        self.mask.restore(self.saved);
    }
}
