//! The fatal signal handler
//!
//! Here be dragons. Everything reachable from [`signal_handler`] runs in
//! signal context: no allocation, no locks, only async-signal-safe calls.
//!
//! ## Admission
//!
//! ```text
//!                 CAS none -> T ok
//!    Idle ───────────────────────────▶ Active(T) ── dump, callbacks ──┐
//!     ▲                                  │                            │
//!     │                   T faults again │ CAS fails, holder == T     │
//!     │                                  ▼                            │
//!     │                           RecursiveFault                      │
//!     │               (warning + raw dump, first time only)           │
//!     │                                                               │
//!     └──────────────── T clears slot, re-raises ◀────────────────────┘
//!
//!    U != T entering while Active(T): sleep 100ms, retry the CAS
//! ```
//!
//! A recursive entry never clears the slot; the outer invocation on the
//! same thread still owns it and releases it when it unwinds.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::installer::call_previous_signal_handler;
use super::registry::REGISTRY;
use super::report::Report;
use super::sink::{FlushOnDrop, SignalSafeSink, SINK};
use crate::domain::ThreadToken;
use crate::symbolization;

/// Retry interval for threads waiting on the admission slot
const ADMISSION_RETRY_NANOS: libc::c_long = 100 * 1000 * 1000;

/// Outcome of one attempt to enter the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller now owns the slot
    Admitted,
    /// The caller already owns the slot: it faulted inside the handler
    Recursive,
    /// Another thread owns the slot
    Busy,
}

/// Holds the token of the one thread allowed to print a report
pub struct AdmissionSlot(AtomicUsize);

impl AdmissionSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicUsize::new(ThreadToken::NONE.0))
    }

    pub fn try_enter(&self, me: ThreadToken) -> Admission {
        match self.0.compare_exchange(ThreadToken::NONE.0, me.0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Admission::Admitted,
            Err(holder) if holder == me.0 => Admission::Recursive,
            Err(_) => Admission::Busy,
        }
    }

    /// Clear the slot if `me` holds it
    pub fn release(&self, me: ThreadToken) {
        let _ = self.0.compare_exchange(me.0, ThreadToken::NONE.0, Ordering::AcqRel, Ordering::Acquire);
    }

    #[must_use]
    pub fn holder(&self) -> ThreadToken {
        ThreadToken(self.0.load(Ordering::Acquire))
    }
}

impl Default for AdmissionSlot {
    fn default() -> Self {
        Self::new()
    }
}

static SIGNAL_THREAD: AdmissionSlot = AdmissionSlot::new();

/// Set by the first recursive entry; later ones print nothing
static IN_RECURSIVE_HANDLER: AtomicBool = AtomicBool::new(false);

/// Entry point registered with `sigaction` for every monitored signal
pub(crate) extern "C" fn signal_handler(
    signum: libc::c_int,
    info: *mut libc::siginfo_t,
    _uctx: *mut libc::c_void,
) {
    let _errno = ErrnoGuard::save();
    let me = ThreadToken::current();
    // SAFETY: the kernel passes a valid siginfo_t for SA_SIGINFO handlers
    let info = unsafe { info.as_ref() };
    report_then_release(&SINK, &SIGNAL_THREAD, me, || inner_signal_handler(signum, info, me));

    // Kill ourselves with the previous handler
    call_previous_signal_handler(signum);
}

/// Run `report`, flush `sink`, then clear `slot` if `report` says this
/// thread holds it
///
/// The next admitted thread must find the sink empty.
fn report_then_release<const N: usize>(
    sink: &SignalSafeSink<N>,
    slot: &AdmissionSlot,
    me: ThreadToken,
    report: impl FnOnce() -> bool,
) {
    let admitted = {
        let _flush = FlushOnDrop::new(sink);
        report()
    };
    if admitted {
        slot.release(me);
    }
}

/// Puts `errno` back when dropped
///
/// A prior disposition that returns resumes the interrupted code, which
/// must not see errors from our writes.
struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    fn save() -> Self {
        // SAFETY: __errno_location returns the calling thread's errno slot
        Self(unsafe { *libc::__errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        // SAFETY: as in `save`
        unsafe { *libc::__errno_location() = self.0 };
    }
}

/// Run the report if admitted; returns whether this call owns the slot
fn inner_signal_handler(signum: libc::c_int, info: Option<&libc::siginfo_t>, me: ThreadToken) -> bool {
    let report = Report::new(&SINK);

    loop {
        match SIGNAL_THREAD.try_enter(me) {
            Admission::Admitted => break,
            Admission::Recursive => {
                // Try once more without symbolization, then give up
                if !IN_RECURSIVE_HANDLER.swap(true, Ordering::AcqRel) {
                    report.print_recursion_warning();
                    report.dump_stack_trace(None);
                }
                return false;
            }
            Admission::Busy => sleep_before_retry(),
        }
    }

    report.dump_time_info();
    report.dump_signal_info(signum, info);
    report.dump_stack_trace(symbolization::global());

    REGISTRY.run();
    true
}

fn sleep_before_retry() {
    let ts = libc::timespec { tv_sec: 0, tv_nsec: ADMISSION_RETRY_NANOS };
    // SAFETY: nanosleep is async-signal-safe; a null remainder is allowed
    unsafe {
        libc::nanosleep(&ts, std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::sync::Barrier;

    #[test]
    fn test_admit_then_recursive() {
        let slot = AdmissionSlot::new();
        let me = ThreadToken::current();

        assert!(slot.holder().is_none());
        assert_eq!(slot.try_enter(me), Admission::Admitted);
        assert_eq!(slot.holder(), me);
        assert_eq!(slot.try_enter(me), Admission::Recursive);
        // A recursive entry leaves the holder in place
        assert_eq!(slot.holder(), me);

        slot.release(me);
        assert!(slot.holder().is_none());
    }

    #[test]
    fn test_other_thread_is_busy_until_release() {
        let slot = AdmissionSlot::new();
        let me = ThreadToken::current();
        assert_eq!(slot.try_enter(me), Admission::Admitted);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let other = ThreadToken::current();
                assert_eq!(slot.try_enter(other), Admission::Busy);
                // Releasing with the wrong token is a no-op
                slot.release(other);
            });
        });
        assert_eq!(slot.holder(), me);

        slot.release(me);
        let other = std::thread::spawn(ThreadToken::current).join().unwrap();
        assert_eq!(slot.try_enter(other), Admission::Admitted);
    }

    #[test]
    fn test_next_holder_finds_report_flushed() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink: SignalSafeSink<1024> = SignalSafeSink::new(file.as_raw_fd());
        let slot = AdmissionSlot::new();
        let reported = Barrier::new(2);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let me = ThreadToken::current();
                report_then_release(&sink, &slot, me, || {
                    assert_eq!(slot.try_enter(me), Admission::Admitted);
                    sink.print(b"first report\n");
                    reported.wait();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    true
                });
            });

            scope.spawn(|| {
                let me = ThreadToken::current();
                reported.wait();
                while slot.try_enter(me) != Admission::Admitted {
                    std::hint::spin_loop();
                }
                let written = std::fs::metadata(file.path()).unwrap().len();
                assert_eq!(written, b"first report\n".len() as u64);
                assert_eq!(sink.pending(), 0);
                slot.release(me);
            });
        });
        assert!(slot.holder().is_none());
    }

    #[test]
    fn test_nested_report_keeps_slot() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink: SignalSafeSink<64> = SignalSafeSink::new(file.as_raw_fd());
        let slot = AdmissionSlot::new();
        let me = ThreadToken::current();
        assert_eq!(slot.try_enter(me), Admission::Admitted);

        report_then_release(&sink, &slot, me, || {
            sink.print(b"nested\n");
            slot.try_enter(me) == Admission::Admitted
        });
        assert_eq!(slot.holder(), me);
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_errno_restored() {
        unsafe { *libc::__errno_location() = libc::EAGAIN };
        {
            let _errno = ErrnoGuard::save();
            unsafe { *libc::__errno_location() = libc::EINVAL };
        }
        assert_eq!(unsafe { *libc::__errno_location() }, libc::EAGAIN);
    }

    #[test]
    fn test_at_most_one_holder_under_contention() {
        let slot = AdmissionSlot::new();
        let inside = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let me = ThreadToken::current();
                    barrier.wait();
                    for _ in 0..200 {
                        while slot.try_enter(me) != Admission::Admitted {
                            std::hint::spin_loop();
                        }
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        slot.release(me);
                    }
                });
            }
        });
        assert!(slot.holder().is_none());
    }
}
