//! Stack frame capture
//!
//! Wraps the platform `backtrace(3)` unwinder. The first call into it lazily
//! loads the unwinder library, which allocates, so the installer calls
//! [`warm_up`] once outside signal context. Later calls only walk the stack.

#![allow(unsafe_code)]

use faultline_common::MAX_STACK_DEPTH;

/// Fixed-capacity list of return addresses, innermost first
pub struct CapturedFrames {
    addresses: [usize; MAX_STACK_DEPTH],
    len: usize,
}

impl CapturedFrames {
    #[must_use]
    pub const fn new() -> Self {
        Self { addresses: [0; MAX_STACK_DEPTH], len: 0 }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.addresses[..self.len]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for CapturedFrames {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill `frames` from the current call stack; false if nothing was captured
///
/// Never inlined: callers rely on this function occupying exactly one frame
/// at the top of the captured stack.
#[inline(never)]
#[cfg(target_env = "gnu")]
pub fn capture_frames(frames: &mut CapturedFrames) -> bool {
    // MAX_STACK_DEPTH is a small constant
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let capacity = MAX_STACK_DEPTH as libc::c_int;
    // SAFETY: `addresses` has room for exactly `capacity` pointer-sized
    // slots and usize has the layout of a pointer.
    let depth = unsafe { libc::backtrace(frames.addresses.as_mut_ptr().cast(), capacity) };
    frames.len = usize::try_from(depth).unwrap_or(0).min(MAX_STACK_DEPTH);
    !frames.is_empty()
}

#[inline(never)]
#[cfg(not(target_env = "gnu"))]
pub fn capture_frames(frames: &mut CapturedFrames) -> bool {
    frames.len = 0;
    false
}

/// Force the unwinder's one-time initialization
pub fn warm_up() {
    let mut frames = CapturedFrames::new();
    if capture_frames(&mut frames) {
        log::debug!("Frame capture ready ({} frames at install)", frames.len());
    } else {
        log::warn!("Stack frame capture unavailable; crash reports will lack stack traces");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn nested(depth: usize, frames: &mut CapturedFrames) -> bool {
        if depth == 0 {
            capture_frames(frames)
        } else {
            let captured = nested(depth - 1, frames);
            std::hint::black_box(captured)
        }
    }

    #[test]
    #[cfg(target_env = "gnu")]
    fn test_capture_current_stack() {
        let mut frames = CapturedFrames::new();
        assert!(capture_frames(&mut frames));
        assert!(frames.len() > 2);
        assert!(frames.as_slice().iter().all(|&addr| addr != 0));
    }

    #[test]
    #[cfg(target_env = "gnu")]
    fn test_capture_is_bounded() {
        let mut frames = CapturedFrames::new();
        assert!(nested(MAX_STACK_DEPTH + 20, &mut frames));
        assert_eq!(frames.len(), MAX_STACK_DEPTH);
    }

    #[test]
    fn test_empty_frames() {
        let frames = CapturedFrames::default();
        assert!(frames.is_empty());
        assert!(frames.as_slice().is_empty());
    }
}
