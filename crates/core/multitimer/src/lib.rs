//! Software timer multiplexing over a single hardware one-shot timer.
//!
//! A [`TimerMux`] keeps up to `N` software deadline timers in a fixed
//! arena and drives one hardware countdown peripheral that can only track
//! a single expiry at a time. The peripheral interrupt runs the expiry
//! detector ([`TimerMux::on_interrupt`]), which re-arms the hardware for
//! the next deadline and dispatches each due timer one of two ways:
//!
//! - [`Dispatch::Immediate`] callbacks run inside the interrupt itself.
//! - [`Dispatch::Deferred`] callbacks are queued and run later from normal
//!   context through [`TimerMux::run_next_expired`] /
//!   [`TimerMux::run_all_expired`], with interrupts enabled.
//!
//! The peripheral is consumed through the traits in [`hw`]. All shared
//! state lives behind an [`sync::IrqLock`], so normal-context operations
//! never observe the detector half-way through a list splice.
//!
//! # Example
//!
//! ```ignore
//! static MUX: TimerMux<Board, usize, DEFAULT_CAPACITY> =
//!     TimerMux::new(Board::new(), Config::DEFAULT);
//!
//! fn timer_isr() {
//!     MUX.on_interrupt();
//! }
//!
//! MUX.init(timer_isr);
//! MUX.schedule(Duration::from_secs(2), Dispatch::Deferred, blink, 4)?;
//! loop {
//!     MUX.run_all_expired();
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hw;
pub mod list;
pub mod log;
pub mod mux;
pub mod pool;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod sync;
pub mod time;

pub use config::{Config, OverlongPolicy};
pub use error::TimerError;
pub use hw::{ClockSource, InterruptMask, IrqState, OneShotTimer, TimerHardware};
pub use mux::TimerMux;
pub use pool::{Dispatch, SlotState, TimerHandle};
pub use time::Instant;
