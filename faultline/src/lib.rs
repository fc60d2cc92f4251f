//! # faultline - Fatal Signal Crash Reports
//!
//! faultline installs a process-wide handler for the signals that end a
//! process abnormally (`SIGSEGV`, `SIGILL`, `SIGFPE`, `SIGABRT`, `SIGBUS`,
//! `SIGTERM`). When one arrives it prints a timestamp, what happened and a
//! symbolized stack trace to stderr, runs user callbacks, then re-raises the
//! signal through whatever disposition was there before, so core dumps and
//! exit statuses are unchanged.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              install_fatal_signal_handler_with()                │
//! │                      (normal context)                           │
//! │  preflight ─▶ build Symbolizer ─▶ warm unwinder ─▶ alt stack    │
//! │                      │                                  │       │
//! │                      ▼                                  ▼       │
//! │               OnceLock<Symbolizer>         sigaction × 6 signals│
//! └──────────────────────┬──────────────────────────────────┬───────┘
//!                        │ read-only                        │ fault
//!                        ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    signal_handler (signal context)              │
//! │                                                                 │
//! │  AdmissionSlot ──▶ Report ──▶ SignalSafeSink ──▶ stderr         │
//! │   (one thread)       │  time / signal / stack trace             │
//! │                      ▼                                          │
//! │               CallbackRegistry::run ──▶ re-raise prior action   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`crash`]: installer, handler state machine, report, sink, capture,
//!   callback registry
//! - [`symbolization`]: install-time ELF/DWARF tables, allocation-free lookup
//! - [`stack`]: guard-page stack allocator and alternate signal stacks
//! - [`config`]: [`HandlerConfig`]
//! - [`preflight`]: debug-info checks on the running executable
//! - [`domain`]: newtypes and error enums
//! - [`cli`]: arguments of the `faultline` drill binary
//!
//! Signal tables, fault reasons and the integer formatters live in the
//! `no_std` `faultline-common` crate and are re-exported here.
//!
//! ## Typical Usage
//!
//! ```rust,no_run
//! fn flush_metrics() {
//!     // async-signal-safe work only
//! }
//!
//! faultline::add_fatal_signal_callback(flush_metrics);
//! faultline::install_fatal_signal_callbacks();
//! faultline::install_fatal_signal_handler();
//! ```
//!
//! ## Key Concepts
//!
//! - **Async-signal-safe**: the handler may interrupt `malloc` or hold no
//!   locks; it only writes to static buffers and calls `write`, `time`,
//!   `nanosleep`, `sigaction` and `raise`
//! - **Admission**: one thread prints at a time; others wait, the same thread
//!   faulting again gets one degraded attempt
//! - **Re-raise**: the original disposition decides the process's fate

pub mod cli;
pub mod config;
pub mod crash;
pub mod domain;
pub mod preflight;
pub mod stack;
pub mod symbolization;

pub use config::HandlerConfig;
pub use crash::{
    add_fatal_signal_callback, install_fatal_signal_callbacks, install_fatal_signal_handler,
    install_fatal_signal_handler_with, SignalCallback,
};
pub use faultline_common::{
    format_dec, format_hex, reason, signal_name, AddressFormatter, DEC_BUF_LEN, FATAL_SIGNALS, HEX_BUF_LEN,
};
pub use stack::{AlternateStack, GuardPageAllocator};
pub use symbolization::Symbolizer;
