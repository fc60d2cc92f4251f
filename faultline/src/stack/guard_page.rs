//! Stack memory with an inaccessible guard page below it
//!
//! Every guarded stack costs two kernel mappings (the guard page and the
//! usable pages split one mapping), so guarded stacks come from a bounded
//! set of caches instead of one `mmap` per stack:
//!
//! ```text
//!         -- increasing addresses -->
//!       guard page     usable pages
//!      |xxxxxxxxxx|..........|..........|
//!      <- alloc_size ------------------->
//!   p -^                <- size -------->
//!                 limit -^
//! ```
//!
//! The requested size is aligned to the *top* of the slot, so running off
//! the bottom of the stack lands on the guard page and faults immediately.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};

use super::page_size;
use crate::domain::StackError;

/// Stacks per cache
pub const NUM_GUARDED: usize = 100;

/// Caches alive at once, process-wide
pub const MAX_IN_USE: usize = 100;

/// Number of live [`StackCache`]s
static CACHES_IN_USE: AtomicUsize = AtomicUsize::new(0);

/// Page-multiple slot size for `size` bytes plus one guard page
fn alloc_size(size: usize) -> usize {
    let page = page_size();
    page * (size.div_ceil(page) + 1)
}

/// One mapping holding [`NUM_GUARDED`] equally sized guarded slots
struct StackCache {
    storage: NonNull<u8>,
    alloc_size: usize,
    /// Slot bases; LIFO
    free_list: Vec<NonNull<u8>>,
}

// SAFETY: the mapping is owned by the cache and only touched through &mut
unsafe impl Send for StackCache {}

impl StackCache {
    /// Reserve a cache slot and map its storage
    fn new(stack_size: usize) -> Result<Option<Self>, StackError> {
        let reserved = CACHES_IN_USE
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < MAX_IN_USE).then_some(n + 1))
            .is_ok();
        if !reserved {
            debug!("Guarded stack cache limit ({MAX_IN_USE}) reached");
            return Ok(None);
        }

        let alloc_size = alloc_size(stack_size);
        let total = alloc_size * NUM_GUARDED;
        // SAFETY: anonymous private mapping with no address hint
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            CACHES_IN_USE.fetch_sub(1, Ordering::AcqRel);
            return Err(StackError::MapFailed { size: total, source: io::Error::last_os_error() });
        }
        let Some(storage) = NonNull::new(p.cast::<u8>()) else {
            CACHES_IN_USE.fetch_sub(1, Ordering::AcqRel);
            return Err(StackError::AllocationFailed(total));
        };

        // From here on Drop unmaps and releases the reservation
        let mut cache = Self { storage, alloc_size, free_list: Vec::with_capacity(NUM_GUARDED) };

        // Protect the bottommost page of every slot
        for i in 0..NUM_GUARDED {
            // SAFETY: i * alloc_size < total, inside the mapping
            let slot = unsafe { storage.add(i * alloc_size) };
            // SAFETY: slot is page aligned and within our mapping
            if unsafe { libc::mprotect(slot.as_ptr().cast(), page_size(), libc::PROT_NONE) } != 0 {
                return Err(StackError::ProtectFailed {
                    addr: slot.as_ptr() as usize,
                    source: io::Error::last_os_error(),
                });
            }
            cache.free_list.push(slot);
        }

        debug!("Mapped guarded stack cache: {NUM_GUARDED} x {alloc_size} bytes");
        Ok(Some(cache))
    }

    fn borrow(&mut self, size: usize) -> Option<NonNull<u8>> {
        if alloc_size(size) != self.alloc_size {
            return None;
        }
        let p = self.free_list.pop()?;
        // SAFETY: alloc_size - size >= one page, so limit stays in the slot
        Some(unsafe { p.add(self.alloc_size - size) })
    }

    fn give_back(&mut self, limit: NonNull<u8>, size: usize) -> bool {
        let base = self.storage.as_ptr() as usize;
        let end = base + self.alloc_size * NUM_GUARDED;
        let Some(p) = (limit.as_ptr() as usize + size).checked_sub(alloc_size(size)) else {
            return false;
        };
        if p < base || p >= end {
            // Not ours
            return false;
        }
        debug_assert_eq!(alloc_size(size), self.alloc_size);
        debug_assert_eq!((p - base) % self.alloc_size, 0);
        // SAFETY: p lies inside the mapping, so it is non-null
        self.free_list.push(unsafe { self.storage.add(p - base) });
        true
    }

    fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

impl Drop for StackCache {
    fn drop(&mut self) {
        // SAFETY: storage/len are exactly what mmap returned
        unsafe {
            libc::munmap(self.storage.as_ptr().cast(), self.alloc_size * NUM_GUARDED);
        }
        CACHES_IN_USE.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Stack allocator that prefers guarded slots and falls back to the heap
///
/// The first guarded allocation fixes the size class of this allocator's
/// cache. Other sizes, an exhausted cache, or the global cache limit all
/// fall back to page-aligned heap memory without a guard page.
pub struct GuardPageAllocator {
    use_guard_pages: bool,
    cache: Option<StackCache>,
    /// Set once a cache could not be created; stop retrying
    cache_unavailable: bool,
}

impl GuardPageAllocator {
    #[must_use]
    pub const fn new(use_guard_pages: bool) -> Self {
        Self { use_guard_pages, cache: None, cache_unavailable: false }
    }

    /// Allocate `size` bytes of stack; the returned pointer is the lowest
    /// usable address
    ///
    /// # Errors
    /// Returns [`StackError::AllocationFailed`] if `size` is zero or the
    /// fallback allocation fails
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, StackError> {
        if size == 0 {
            return Err(StackError::AllocationFailed(size));
        }

        if self.use_guard_pages && self.cache.is_none() && !self.cache_unavailable {
            match StackCache::new(size) {
                Ok(Some(cache)) => self.cache = Some(cache),
                Ok(None) => self.cache_unavailable = true,
                Err(e) => {
                    warn!("Guard pages unavailable, using unguarded stacks: {e}");
                    self.cache_unavailable = true;
                }
            }
        }

        if let Some(limit) = self.cache.as_mut().and_then(|cache| cache.borrow(size)) {
            return Ok(limit);
        }

        let layout = fallback_layout(size)?;
        // SAFETY: layout has non-zero size
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(StackError::AllocationFailed(size))
    }

    /// Release memory returned by [`allocate`](Self::allocate) with the same `size`
    pub fn deallocate(&mut self, limit: NonNull<u8>, size: usize) {
        if self.cache.as_mut().is_some_and(|cache| cache.give_back(limit, size)) {
            return;
        }
        if let Ok(layout) = fallback_layout(size) {
            // SAFETY: not from the cache, so it came from alloc with this layout
            unsafe { alloc::dealloc(limit.as_ptr(), layout) };
        }
    }

    /// Whether this allocator currently owns a guarded cache
    #[must_use]
    pub fn is_guarded(&self) -> bool {
        self.cache.is_some()
    }

    /// Free guarded slots left in the cache (0 without a cache)
    #[must_use]
    pub fn free_guarded(&self) -> usize {
        self.cache.as_ref().map_or(0, StackCache::free_count)
    }
}

fn fallback_layout(size: usize) -> Result<Layout, StackError> {
    Layout::from_size_align(size, page_size()).map_err(|_| StackError::AllocationFailed(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 64 << 10;

    fn is_guard_page(addr: usize) -> bool {
        // A ---p mapping covering addr
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
        maps.lines().any(|line| {
            let mut fields = line.split_whitespace();
            let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
                return false;
            };
            let Some((start, end)) = range.split_once('-') else {
                return false;
            };
            let start = usize::from_str_radix(start, 16).unwrap();
            let end = usize::from_str_radix(end, 16).unwrap();
            perms.starts_with("---") && (start..end).contains(&addr)
        })
    }

    #[test]
    fn test_alloc_size_adds_guard_page() {
        let page = page_size();
        assert_eq!(alloc_size(1), 2 * page);
        assert_eq!(alloc_size(page), 2 * page);
        assert_eq!(alloc_size(page + 1), 3 * page);
    }

    #[test]
    fn test_guarded_allocation_is_top_aligned() {
        let mut allocator = GuardPageAllocator::new(true);
        let limit = allocator.allocate(SIZE).unwrap();
        assert!(allocator.is_guarded());

        let addr = limit.as_ptr() as usize;
        // Whole region writable
        unsafe {
            std::ptr::write_bytes(limit.as_ptr(), 0xa5, SIZE);
            assert_eq!(*limit.as_ptr().add(SIZE - 1), 0xa5);
        }
        // The page just below the usable region is the guard
        assert!(is_guard_page(addr - 1));
        assert!(!is_guard_page(addr));

        allocator.deallocate(limit, SIZE);
    }

    #[test]
    fn test_distinct_slots_and_lifo_reuse() {
        let mut allocator = GuardPageAllocator::new(true);
        let a = allocator.allocate(SIZE).unwrap();
        let b = allocator.allocate(SIZE).unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.free_guarded(), NUM_GUARDED - 2);

        allocator.deallocate(a, SIZE);
        assert_eq!(allocator.free_guarded(), NUM_GUARDED - 1);
        assert_eq!(allocator.allocate(SIZE).unwrap(), a);

        allocator.deallocate(a, SIZE);
        allocator.deallocate(b, SIZE);
        assert_eq!(allocator.free_guarded(), NUM_GUARDED);
    }

    #[test]
    fn test_other_size_class_falls_back() {
        let mut allocator = GuardPageAllocator::new(true);
        let guarded = allocator.allocate(SIZE).unwrap();
        let free = allocator.free_guarded();

        let other = allocator.allocate(SIZE * 2).unwrap();
        assert_eq!(allocator.free_guarded(), free);
        assert_eq!(other.as_ptr() as usize % page_size(), 0);
        allocator.deallocate(other, SIZE * 2);

        allocator.deallocate(guarded, SIZE);
    }

    #[test]
    fn test_disabled_guard_pages_use_fallback() {
        let mut allocator = GuardPageAllocator::new(false);
        let limit = allocator.allocate(SIZE).unwrap();
        assert!(!allocator.is_guarded());
        assert_eq!(limit.as_ptr() as usize % page_size(), 0);
        unsafe { std::ptr::write_bytes(limit.as_ptr(), 0, SIZE) };
        allocator.deallocate(limit, SIZE);
    }

    #[test]
    fn test_exhausted_cache_falls_back() {
        let mut allocator = GuardPageAllocator::new(true);
        let stacks: Vec<_> = (0..=NUM_GUARDED).map(|_| allocator.allocate(4096).unwrap()).collect();
        assert_eq!(allocator.free_guarded(), 0);
        for stack in stacks {
            allocator.deallocate(stack, 4096);
        }
        assert_eq!(allocator.free_guarded(), NUM_GUARDED);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut allocator = GuardPageAllocator::new(true);
        assert!(matches!(allocator.allocate(0), Err(StackError::AllocationFailed(0))));
    }
}
