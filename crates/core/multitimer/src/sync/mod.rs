//! Synchronization between interrupt and normal context.
//!
//! Provides [`IrqLock`], the single critical-section primitive the
//! multiplexer uses for its pool and lists.

mod irq_lock;

pub use irq_lock::{IrqLock, IrqLockGuard};
