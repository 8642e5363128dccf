//! Logging macros for the MAC schedulers with verbosity level control.
//!
//! Zero-cost when disabled (verbosity=0). Levels:
//! - 0: SILENT (only errors)
//! - 1: CHANGES (allocations, grants created/re-armed/dropped)
//! - 2: CHECKS (eligibility, skipped slots, starvation reasons)
//! - 3: DEBUG (per-user metric internals, per-slot consumption)
//!
//! By engine:
//! - `pf`: CHANGES for attach/detach and each iteration's decisions. CHECKS
//!   for users dropped from an iteration or ranking and for users whose
//!   buffer is covered. DEBUG for every RBG handed out with its metric.
//! - `sidelink`: CHANGES for grant state transitions and LC configuration.
//!   CHECKS for trigger summaries, exhausted grants and destinations left
//!   unserved or failed. DEBUG for buffer reports, slot pools, TB sizing and
//!   per-slot transmissions.

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: RBG assignments, sidelink grant creation, reselection.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            eprintln!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: candidate slot rejection, destinations that could not be served.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            eprintln!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
///
/// Used for: throughput averages, potential throughput, counter values.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            eprintln!($($arg)*);
        }
    };
}
