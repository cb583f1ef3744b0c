//! Leveled logging for the timer multiplexer.
//!
//! The crate never owns an output device. The embedding firmware registers
//! a sink with [`set_log_fn`]; until then every message is discarded.
//! Messages more verbose than [`MAX_LOG_LEVEL`](crate::config::MAX_LOG_LEVEL)
//! are filtered before the sink is called.
//!
//! The detector logs from interrupt context, so sinks must not block and
//! must not call back into the multiplexer.

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::config::MAX_LOG_LEVEL;

// ---------------------------------------------------------------------------
// Log levels, lower is more severe
// ---------------------------------------------------------------------------

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Error: an operation failed in a way the caller should hear about.
    Error = 1,
    /// Warning: a request was dropped or adjusted.
    Warn = 2,
    /// Informational: lifecycle events such as initialization.
    Info = 3,
    /// Debug: rejected requests and other diagnostics.
    Debug = 4,
    /// Trace: every schedule, interrupt and dispatch.
    Trace = 5,
}

// ---------------------------------------------------------------------------
// Sink registration
// ---------------------------------------------------------------------------

/// The signature of the global log sink.
pub type LogFn = fn(LogLevel, fmt::Arguments<'_>);

fn null_log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

/// Registers the global log sink.
///
/// # Safety
///
/// The provided function must be safe to call from any context, including
/// the timer interrupt handler. May be called more than once; uses
/// `Release` ordering so subsequent loads see the new function.
pub unsafe fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

/// Loads the current sink from the atomic pointer.
#[inline]
fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `LogFn` pointers (or the initial `null_log`) are
    // ever stored into LOG_FN.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

/// Returns `true` if messages at `level` reach the sink.
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level <= MAX_LOG_LEVEL
}

/// Implementation detail for [`mtlog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    if enabled(level) {
        load_log_fn()(level, args);
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Logs a message at the given level.
#[macro_export]
macro_rules! mtlog {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, format_args!($($arg)*))
    };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! mterr {
    ($($arg:tt)*) => { $crate::mtlog!($crate::log::LogLevel::Error, $($arg)*) };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! mtwarn {
    ($($arg:tt)*) => { $crate::mtlog!($crate::log::LogLevel::Warn, $($arg)*) };
}

/// Logs an info-level message.
#[macro_export]
macro_rules! mtinfo {
    ($($arg:tt)*) => { $crate::mtlog!($crate::log::LogLevel::Info, $($arg)*) };
}

/// Logs a debug-level message.
#[macro_export]
macro_rules! mtdebug {
    ($($arg:tt)*) => { $crate::mtlog!($crate::log::LogLevel::Debug, $($arg)*) };
}

/// Logs a trace-level message.
#[macro_export]
macro_rules! mttrace {
    ($($arg:tt)*) => { $crate::mtlog!($crate::log::LogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn errors_always_enabled() {
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Info));
    }

    #[test]
    fn sink_receives_messages() {
        use std::sync::atomic::AtomicUsize;

        static HITS: AtomicUsize = AtomicUsize::new(0);

        fn counting_sink(level: LogLevel, args: fmt::Arguments<'_>) {
            if level == LogLevel::Error && format!("{args}") == "sink probe 7" {
                HITS.fetch_add(1, Ordering::Relaxed);
            }
        }

        // SAFETY: `counting_sink` only touches an atomic.
        unsafe { set_log_fn(counting_sink) };
        mterr!("sink probe {}", 7);
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
        // SAFETY: restoring the no-op sink.
        unsafe { set_log_fn(null_log) };
    }
}
