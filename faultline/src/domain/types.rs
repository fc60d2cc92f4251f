//! Domain types providing compile-time safety and self-documentation
//!
//! These wrappers keep raw `c_int` / `pthread_t` values from being mixed up
//! in signatures that take several integers.

#![allow(unsafe_code)] // pthread_self / gettid

use std::fmt;

use faultline_common::signal_name;

/// Signal number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(pub libc::c_int);

impl Signal {
    /// Display name if the signal is one of the monitored set
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        signal_name(self.0)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "signal {}", self.0),
        }
    }
}

/// Opaque identity of a thread, used for handler admission
///
/// Wraps `pthread_self()`. On Linux a `pthread_t` is the address of the
/// thread control block, so 0 never names a live thread and serves as the
/// "no thread" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(pub usize);

impl ThreadToken {
    /// Reserved value meaning "no thread holds the slot"
    pub const NONE: ThreadToken = ThreadToken(0);

    /// Token of the calling thread
    #[must_use]
    pub fn current() -> Self {
        // SAFETY: pthread_self has no preconditions and is async-signal-safe
        #[allow(clippy::cast_possible_truncation)]
        let id = unsafe { libc::pthread_self() } as usize;
        Self(id)
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Kernel thread ID (`gettid(2)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub i64);

impl Tid {
    /// Kernel thread ID of the calling thread
    #[must_use]
    pub fn current() -> Self {
        // SAFETY: SYS_gettid takes no arguments and cannot fail
        Self(i64::from(unsafe { libc::syscall(libc::SYS_gettid) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal(libc::SIGSEGV).to_string(), "SIGSEGV (11)");
        assert_eq!(Signal(libc::SIGUSR1).to_string(), format!("signal {}", libc::SIGUSR1));
    }

    #[test]
    fn test_thread_tokens_are_distinct_and_never_none() {
        let main = ThreadToken::current();
        assert!(!main.is_none());
        assert_eq!(main, ThreadToken::current());

        let other = std::thread::spawn(ThreadToken::current).join().unwrap();
        assert!(!other.is_none());
        assert_ne!(main, other);
    }

    #[test]
    fn test_tid_differs_across_threads() {
        let tid = std::thread::spawn(Tid::current).join().unwrap();
        assert!(tid.0 > 0);
        assert_ne!(tid, Tid::current());
    }
}
