//! Guarded stack memory and alternate signal stacks
//!
//! A thread that overflows its stack faults with nowhere to run the
//! handler. Registering an alternate signal stack with `sigaltstack` gives
//! the kernel somewhere else to deliver the signal; the memory for it comes
//! from [`GuardPageAllocator`] so an overflow *of the handler itself* also
//! faults cleanly instead of scribbling over neighbouring memory.

#![allow(unsafe_code)] // sysconf

pub mod alt_stack;
pub mod guard_page;

use std::sync::OnceLock;

pub use alt_stack::{current_alternate_stack_size, ensure_alternate_stack, min_sigstack_size, AlternateStack};
pub use guard_page::GuardPageAllocator;

/// System page size, queried once
pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no memory-safety preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).ok().filter(|&size| size > 0).unwrap_or(4096)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let page = page_size();
        assert!(page >= 4096);
        assert!(page.is_power_of_two());
    }
}
