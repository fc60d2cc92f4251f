//! # Crash Path
//!
//! Everything that runs when a fatal signal arrives, plus the installer
//! that arms it.
//!
//! ## Submodules
//!
//! - **`installer`**: one-shot `sigaction` registration, saved dispositions,
//!   re-raise through the prior disposition
//! - **`handler`**: admission slot and the signal entry point
//! - **`report`**: time, signal and stack-trace sections of a report
//! - **`sink`**: static 64 KiB buffer in front of stderr
//! - **`capture`**: `backtrace(3)` into a fixed array
//! - **`registry`**: user callbacks run after the report

pub mod capture;
pub mod handler;
pub mod installer;
pub mod registry;
pub mod report;
pub mod sink;

pub use capture::{capture_frames, CapturedFrames};
pub use handler::{Admission, AdmissionSlot};
pub use installer::{install_fatal_signal_handler, install_fatal_signal_handler_with, is_installed};
pub use registry::{add_fatal_signal_callback, install_fatal_signal_callbacks, CallbackRegistry, SignalCallback};
pub use report::Report;
pub use sink::SignalSafeSink;
