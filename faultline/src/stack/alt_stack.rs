//! Per-thread alternate signal stacks

#![allow(unsafe_code)]

use std::io;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, PoisonError};

use log::debug;

use super::guard_page::GuardPageAllocator;
use crate::domain::StackError;

/// `AT_MINSIGSTKSZ` auxv entry (Linux 5.14+; 0 when absent)
const AT_MINSIGSTKSZ: libc::c_ulong = 51;

/// Backing memory for every [`AlternateStack`]
static ALLOCATOR: Mutex<GuardPageAllocator> = Mutex::new(GuardPageAllocator::new(true));

/// Smallest stack the kernel will deliver a signal onto
///
/// The larger of `SIGSTKSZ` and the kernel-reported `AT_MINSIGSTKSZ`, which
/// can exceed `SIGSTKSZ` on machines with large vector register state.
#[must_use]
pub fn min_sigstack_size() -> usize {
    // SAFETY: getauxval only reads the auxiliary vector
    let kernel_min = unsafe { libc::getauxval(AT_MINSIGSTKSZ) };
    usize::try_from(kernel_min).unwrap_or(0).max(libc::SIGSTKSZ)
}

/// Size of the calling thread's alternate stack, `None` when disabled
#[must_use]
pub fn current_alternate_stack_size() -> Option<usize> {
    let mut current = empty_stack();
    // SAFETY: query only; `current` is a valid out pointer
    if unsafe { libc::sigaltstack(ptr::null(), &mut current) } != 0 {
        return None;
    }
    (current.ss_flags & libc::SS_DISABLE == 0).then_some(current.ss_size)
}

/// Install an alternate stack of `size` bytes unless the thread already has
/// one at least that large
///
/// # Errors
/// See [`AlternateStack::install`]
pub fn ensure_alternate_stack(size: usize) -> Result<Option<AlternateStack>, StackError> {
    if let Some(current) = current_alternate_stack_size() {
        if current >= size {
            debug!("Keeping existing {current} byte alternate signal stack");
            return Ok(None);
        }
    }
    AlternateStack::install(size).map(Some)
}

/// An alternate signal stack registered for the calling thread
///
/// Dropping it restores the thread's previous alternate stack. Must be
/// dropped on the thread that installed it.
pub struct AlternateStack {
    base: NonNull<u8>,
    size: usize,
    previous: libc::stack_t,
}

impl AlternateStack {
    /// Allocate a guarded stack and register it with `sigaltstack`
    ///
    /// # Errors
    /// [`StackError::TooSmall`] below [`min_sigstack_size`], allocation
    /// failures, or [`StackError::Sigaltstack`] if the kernel refuses it
    pub fn install(size: usize) -> Result<Self, StackError> {
        let min = min_sigstack_size();
        if size < min {
            return Err(StackError::TooSmall { size, min });
        }

        let base = lock_allocator().allocate(size)?;
        let stack = libc::stack_t { ss_sp: base.as_ptr().cast(), ss_flags: 0, ss_size: size };
        let mut previous = empty_stack();

        // SAFETY: `stack` describes `size` bytes we own until Drop
        if unsafe { libc::sigaltstack(&stack, &mut previous) } != 0 {
            let err = io::Error::last_os_error();
            lock_allocator().deallocate(base, size);
            return Err(StackError::Sigaltstack(err));
        }

        debug!("Installed {size} byte alternate signal stack at {:p}", base.as_ptr());
        Ok(Self { base, size, previous })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Lowest usable address of the stack
    #[must_use]
    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Keep the stack registered for the rest of the thread's life
    pub fn leak(self) {
        std::mem::forget(self);
    }
}

impl Drop for AlternateStack {
    fn drop(&mut self) {
        let mut restore = self.previous;
        restore.ss_flags &= libc::SS_DISABLE;
        // SAFETY: restoring a descriptor the kernel handed us
        if unsafe { libc::sigaltstack(&restore, ptr::null_mut()) } != 0 {
            // Still in use (we are running on it); leave the memory mapped
            return;
        }
        lock_allocator().deallocate(self.base, self.size);
    }
}

fn lock_allocator() -> std::sync::MutexGuard<'static, GuardPageAllocator> {
    ALLOCATOR.lock().unwrap_or_else(PoisonError::into_inner)
}

fn empty_stack() -> libc::stack_t {
    libc::stack_t { ss_sp: ptr::null_mut(), ss_flags: libc::SS_DISABLE, ss_size: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 256 << 10;

    #[test]
    fn test_min_sigstack_size() {
        assert!(min_sigstack_size() >= libc::SIGSTKSZ);
    }

    #[test]
    fn test_too_small_rejected() {
        let err = AlternateStack::install(1024).err().unwrap();
        assert!(matches!(err, StackError::TooSmall { size: 1024, .. }));
    }

    #[test]
    fn test_install_and_restore() {
        std::thread::spawn(|| {
            let before = current_alternate_stack_size();

            let stack = AlternateStack::install(SIZE).unwrap();
            assert_eq!(stack.size(), SIZE);
            assert_eq!(current_alternate_stack_size(), Some(SIZE));
            assert!(!stack.base().is_null());

            drop(stack);
            assert_eq!(current_alternate_stack_size(), before);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_ensure_keeps_larger_stack() {
        std::thread::spawn(|| {
            let stack = ensure_alternate_stack(SIZE).unwrap().expect("installs when smaller");
            assert!(ensure_alternate_stack(SIZE / 2).unwrap().is_none());
            assert!(ensure_alternate_stack(SIZE).unwrap().is_none());
            drop(stack);
        })
        .join()
        .unwrap();
    }
}
