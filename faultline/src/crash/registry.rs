//! Fatal signal callback registry
//!
//! Callbacks are appended while the application starts up, then the list is
//! sealed and becomes immutable. The handler reads the sealed list without
//! taking a lock, so a crash while another thread holds the registry mutex
//! cannot deadlock the report.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// A function run from inside the fatal signal handler
///
/// Runs in signal context after the report has been written: it must stick
/// to async-signal-safe operations.
pub type SignalCallback = fn();

/// Append-then-seal list of [`SignalCallback`]s
pub struct CallbackRegistry {
    pending: Mutex<Vec<SignalCallback>>,
    sealed: OnceLock<Box<[SignalCallback]>>,
}

/// The process-wide registry behind [`add_fatal_signal_callback`]
pub(crate) static REGISTRY: CallbackRegistry = CallbackRegistry::new();

impl CallbackRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: Mutex::new(Vec::new()), sealed: OnceLock::new() }
    }

    /// Register a callback
    ///
    /// # Panics
    /// If the registry has already been sealed.
    pub fn add(&self, callback: SignalCallback) {
        let mut pending = self.lock();
        assert!(
            !self.is_sealed(),
            "CallbackRegistry::add may not be used after installing the signal callbacks"
        );
        pending.push(callback);
    }

    /// Freeze the callback list; the handler runs callbacks only after this
    ///
    /// # Panics
    /// If called more than once.
    pub fn seal(&self) {
        let mut pending = self.lock();
        let callbacks = std::mem::take(&mut *pending).into_boxed_slice();
        assert!(
            self.sealed.set(callbacks).is_ok(),
            "CallbackRegistry::seal must be called at most once"
        );
        log::debug!("Sealed {} fatal signal callback(s)", self.len());
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// Number of sealed callbacks (0 while unsealed)
    #[must_use]
    pub fn len(&self) -> usize {
        self.sealed.get().map_or(0, |callbacks| callbacks.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke sealed callbacks in registration order; no-op while unsealed
    pub fn run(&self) {
        if let Some(callbacks) = self.sealed.get() {
            for callback in callbacks.iter() {
                callback();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SignalCallback>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a callback to run when a fatal signal is handled
///
/// # Panics
/// If called after [`install_fatal_signal_callbacks`].
pub fn add_fatal_signal_callback(callback: SignalCallback) {
    REGISTRY.add(callback);
}

/// Seal the callback list so the handler starts running it
///
/// # Panics
/// If called more than once.
pub fn install_fatal_signal_callbacks() {
    REGISTRY.seal();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    static ORDER: StdMutex<Vec<u8>> = StdMutex::new(Vec::new());

    fn first() {
        ORDER.lock().unwrap().push(1);
    }

    fn second() {
        ORDER.lock().unwrap().push(2);
    }

    fn third() {
        ORDER.lock().unwrap().push(3);
    }

    static UNSEALED_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn count_unsealed() {
        UNSEALED_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_run_in_registration_order() {
        let registry = CallbackRegistry::new();
        registry.add(second);
        registry.add(first);
        registry.add(third);
        registry.seal();

        assert_eq!(registry.len(), 3);
        registry.run();
        assert_eq!(*ORDER.lock().unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn test_run_before_seal_is_noop() {
        let registry = CallbackRegistry::new();
        registry.add(count_unsealed);
        registry.run();

        assert!(!registry.is_sealed());
        assert!(registry.is_empty());
        assert_eq!(UNSEALED_CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_seal_without_callbacks() {
        let registry = CallbackRegistry::new();
        registry.seal();
        assert!(registry.is_sealed());
        registry.run();
    }

    #[test]
    #[should_panic(expected = "may not be used after installing")]
    fn test_add_after_seal_panics() {
        let registry = CallbackRegistry::new();
        registry.seal();
        registry.add(first);
    }

    #[test]
    #[should_panic(expected = "at most once")]
    fn test_double_seal_panics() {
        let registry = CallbackRegistry::new();
        registry.seal();
        registry.seal();
    }

    #[test]
    fn test_concurrent_add() {
        let registry = CallbackRegistry::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..16 {
                        registry.add(count_unsealed);
                    }
                });
            }
        });
        registry.seal();
        assert_eq!(registry.len(), 128);
    }
}
