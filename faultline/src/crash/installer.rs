//! Signal registration and the saved prior dispositions
//!
//! Each monitored signal gets a descriptor whose prior `sigaction` is filled
//! in exactly once, by the installer. The handler reads it back only to
//! re-raise, after the descriptor is marked saved.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use faultline_common::{FatalSignal, FATAL_SIGNALS};
use log::{debug, error, info, warn};

use super::capture;
use super::handler::signal_handler;
use crate::config::HandlerConfig;
use crate::domain::{InstallError, Signal};
use crate::preflight;
use crate::stack::ensure_alternate_stack;
use crate::symbolization::{self, Symbolizer};

struct SignalDescriptor {
    signal: FatalSignal,
    old_action: UnsafeCell<MaybeUninit<libc::sigaction>>,
    saved: AtomicBool,
}

// SAFETY: old_action is written once by the installer before `saved` is
// published with Release, and only read after an Acquire load of `saved`
unsafe impl Sync for SignalDescriptor {}

impl SignalDescriptor {
    const fn new(signal: FatalSignal) -> Self {
        Self { signal, old_action: UnsafeCell::new(MaybeUninit::uninit()), saved: AtomicBool::new(false) }
    }

    fn saved_action(&self) -> Option<*const libc::sigaction> {
        self.saved.load(Ordering::Acquire).then(|| self.old_action.get().cast_const().cast::<libc::sigaction>())
    }
}

static DESCRIPTORS: [SignalDescriptor; FATAL_SIGNALS.len()] = [
    SignalDescriptor::new(FATAL_SIGNALS[0]),
    SignalDescriptor::new(FATAL_SIGNALS[1]),
    SignalDescriptor::new(FATAL_SIGNALS[2]),
    SignalDescriptor::new(FATAL_SIGNALS[3]),
    SignalDescriptor::new(FATAL_SIGNALS[4]),
    SignalDescriptor::new(FATAL_SIGNALS[5]),
];

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the fatal signal handler with [`HandlerConfig::default`]
pub fn install_fatal_signal_handler() {
    install_fatal_signal_handler_with(&HandlerConfig::default());
}

/// Install the fatal signal handler; only the first call in a process
/// does anything
///
/// Symbolizer and alternate stack problems are logged and degrade the
/// report. Failing to register a signal aborts the process.
pub fn install_fatal_signal_handler_with(config: &HandlerConfig) {
    if INSTALLED.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        debug!("Fatal signal handler already installed");
        return;
    }

    preflight::check_current_executable();

    if config.symbolize {
        match Symbolizer::from_current_process(config.symbol_cache_capacity, config.line_tables) {
            Ok(symbolizer) => {
                symbolization::publish(symbolizer);
            }
            Err(e) => warn!("Symbolizer unavailable, crash reports will show raw addresses: {e:#}"),
        }
    }

    capture::warm_up();

    if let Some(size) = config.alternate_stack_size {
        match ensure_alternate_stack(size) {
            Ok(Some(stack)) => stack.leak(),
            Ok(None) => {}
            Err(e) => warn!("No alternate signal stack for this thread: {e}"),
        }
    }

    if let Err(e) = register_handlers() {
        error!("{e}");
        eprintln!("faultline: {e}");
        std::process::abort();
    }

    info!(
        "Fatal signal handler installed for {}",
        FATAL_SIGNALS.iter().map(|signal| signal.name).collect::<Vec<_>>().join(", ")
    );
}

/// Whether a call to install has won the one-shot gate
#[must_use]
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

fn register_handlers() -> Result<(), InstallError> {
    let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) = signal_handler;

    // SAFETY: all-zero is a valid sigaction
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = handler as libc::sighandler_t;
    // Run on the alternate stack when the thread has one, so a stack
    // overflow can still be reported
    sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
    // SAFETY: sa_mask is a valid sigset_t; an empty mask lets a second
    // fatal signal interrupt a dump in progress
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };

    for descriptor in &DESCRIPTORS {
        let number = descriptor.signal.number;
        let old = descriptor.old_action.get().cast::<libc::sigaction>();
        // SAFETY: `old` points at storage for one sigaction owned by the
        // descriptor; nothing reads it until `saved` is set
        if unsafe { libc::sigaction(number, &sa, old) } != 0 {
            return Err(InstallError::SigactionFailed {
                signal: Signal(number),
                source: std::io::Error::last_os_error(),
            });
        }
        descriptor.saved.store(true, Ordering::Release);
    }

    Ok(())
}

/// Restore the prior disposition of `signum` and raise it again
///
/// The signal stays blocked until the running handler returns, then the
/// prior disposition takes over. Signals without a saved disposition are
/// reset to the default action.
pub(crate) fn call_previous_signal_handler(signum: libc::c_int) {
    let saved = DESCRIPTORS
        .iter()
        .find(|descriptor| descriptor.signal.number == signum)
        .and_then(SignalDescriptor::saved_action);

    // SAFETY: sigaction and raise are async-signal-safe; `old` points at a
    // sigaction the kernel filled in
    unsafe {
        if let Some(old) = saved {
            libc::sigaction(signum, old, ptr::null_mut());
        } else {
            let mut sa: libc::sigaction = mem::zeroed();
            sa.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(signum, &sa, ptr::null_mut());
        }
        libc::raise(signum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table_matches_fatal_signals() {
        let numbers: Vec<_> = DESCRIPTORS.iter().map(|d| d.signal.number).collect();
        assert_eq!(
            numbers,
            [libc::SIGSEGV, libc::SIGILL, libc::SIGFPE, libc::SIGABRT, libc::SIGBUS, libc::SIGTERM]
        );
    }

    #[test]
    fn test_unsaved_descriptor_has_no_action() {
        let descriptor = SignalDescriptor::new(FATAL_SIGNALS[0]);
        assert!(descriptor.saved_action().is_none());
    }

    #[test]
    fn test_second_install_keeps_first_prior_actions() {
        let config = HandlerConfig {
            symbolize: false,
            line_tables: false,
            alternate_stack_size: None,
            ..HandlerConfig::default()
        };
        install_fatal_signal_handler_with(&config);
        install_fatal_signal_handler_with(&config);
        assert!(is_installed());

        let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) = signal_handler;
        let ours = handler as libc::sighandler_t;
        for descriptor in &DESCRIPTORS {
            let name = descriptor.signal.name;
            let saved = descriptor.saved_action().unwrap();
            // Re-raising must never land back in our own handler
            assert_ne!(unsafe { (*saved).sa_sigaction }, ours, "{name}");

            let mut current: libc::sigaction = unsafe { mem::zeroed() };
            unsafe { libc::sigaction(descriptor.signal.number, ptr::null(), &mut current) };
            assert_eq!(current.sa_sigaction, ours, "{name}");
            assert_ne!(current.sa_flags & libc::SA_ONSTACK, 0, "{name}");
        }
    }

    #[test]
    fn test_unknown_signal_falls_back_to_default() {
        // SIGURG's default action is to ignore, so re-raising it is harmless
        call_previous_signal_handler(libc::SIGURG);

        let mut current: libc::sigaction = unsafe { mem::zeroed() };
        unsafe { libc::sigaction(libc::SIGURG, ptr::null(), &mut current) };
        assert_eq!(current.sa_sigaction, libc::SIG_DFL);
    }
}
