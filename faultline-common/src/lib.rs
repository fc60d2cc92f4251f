//! # Shared Crash-Path Data (signal-safe, allocation-free)
//!
//! Tables and pure functions that are safe to call from inside an
//! asynchronous signal handler. Nothing in this crate allocates, locks, or
//! calls through a function pointer; every lookup is a scan over `const`
//! data and every formatter writes into a caller-provided stack buffer.
//!
//! ## Contents
//!
//! - [`FATAL_SIGNALS`] - The fixed set of monitored signals and their names
//! - [`reason`] - `(signal, si_code)` → human-readable fault reason
//! - [`fmt`] - Decimal, hex and frame-address formatters
//!
//! The `faultline` crate pairs [`FATAL_SIGNALS`] with the dispositions it
//! saves at install time; the order of the table is the install order.

#![cfg_attr(not(test), no_std)]

pub mod fmt;
pub mod reason;

pub use fmt::{format_dec, format_hex, AddressFormatter, DEC_BUF_LEN, HEX_BUF_LEN};
pub use reason::reason;

use libc::c_int;

// ============================================================================
// Crash Path Limits
// ============================================================================

/// Maximum number of return addresses captured for one report
///
/// Frames beyond this depth are silently dropped. 100 frames comfortably
/// covers deep recursion while keeping the capture buffer at 800 bytes of
/// handler stack.
pub const MAX_STACK_DEPTH: usize = 100;

/// Capacity of the shared crash-report buffer (64 KiB)
///
/// Sized so a complete report goes out in a single `write(2)`, which keeps
/// reports from concurrently crashing threads from interleaving.
pub const SINK_CAPACITY: usize = 64 << 10;

/// Default number of ELF objects indexed by the symbolizer
pub const DEFAULT_SYMBOL_CACHE_CAPACITY: usize = 500;

/// Frames belonging to the capture machinery itself
///
/// `capture_frames` and `dump_stack_trace` sit on top of every captured
/// stack; symbolized output starts below them. The signal handler frames
/// are kept so the report shows where the trampoline entered.
pub const SKIPPED_INNER_FRAMES: usize = 2;

/// `si_code` value for signals generated by the kernel itself
///
/// Kernel-sourced `siginfo_t` carries no meaningful sender PID/UID.
pub const SI_KERNEL: c_int = 0x80;

// ============================================================================
// Monitored Signals
// ============================================================================

/// A signal the fatal handler is installed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalSignal {
    /// Signal number (`SIGSEGV`, ...)
    pub number: c_int,
    /// Display name printed in reports
    pub name: &'static str,
}

/// The monitored signal set, in install order
///
/// This set is part of the public contract: every entry gets the fatal
/// handler, nothing else does.
pub const FATAL_SIGNALS: [FatalSignal; 6] = [
    FatalSignal { number: libc::SIGSEGV, name: "SIGSEGV" },
    FatalSignal { number: libc::SIGILL, name: "SIGILL" },
    FatalSignal { number: libc::SIGFPE, name: "SIGFPE" },
    FatalSignal { number: libc::SIGABRT, name: "SIGABRT" },
    FatalSignal { number: libc::SIGBUS, name: "SIGBUS" },
    FatalSignal { number: libc::SIGTERM, name: "SIGTERM" },
];

/// Index of `signum` in [`FATAL_SIGNALS`], if monitored
#[must_use]
pub fn fatal_signal_index(signum: c_int) -> Option<usize> {
    FATAL_SIGNALS.iter().position(|s| s.number == signum)
}

/// Display name of a monitored signal
#[must_use]
pub fn signal_name(signum: c_int) -> Option<&'static str> {
    fatal_signal_index(signum).map(|idx| FATAL_SIGNALS[idx].name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGSEGV), Some("SIGSEGV"));
        assert_eq!(signal_name(libc::SIGTERM), Some("SIGTERM"));
        assert_eq!(signal_name(libc::SIGUSR1), None);
        assert_eq!(signal_name(0), None);
    }

    #[test]
    fn test_fatal_signal_set_is_fixed() {
        let numbers: Vec<c_int> = FATAL_SIGNALS.iter().map(|s| s.number).collect();
        assert_eq!(
            numbers,
            vec![
                libc::SIGSEGV,
                libc::SIGILL,
                libc::SIGFPE,
                libc::SIGABRT,
                libc::SIGBUS,
                libc::SIGTERM
            ]
        );
        assert_eq!(fatal_signal_index(libc::SIGABRT), Some(3));
    }
}
