//! Signal-safe buffered output
//!
//! A fixed-capacity buffer in static storage in front of a raw descriptor.
//! Reports are accumulated here and written with as few `write(2)` calls as
//! possible so that output from different processes sharing stderr stays
//! readable.
//!
//! The sink is deliberately not synchronized. Only the thread admitted by
//! the handler state machine prints, plus that same thread when it faults
//! again inside its own handler.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::io;

use faultline_common::{format_dec, format_hex, DEC_BUF_LEN, HEX_BUF_LEN, SINK_CAPACITY};

/// The process-wide crash report sink, bound to standard error
pub(crate) static SINK: SignalSafeSink<SINK_CAPACITY> = SignalSafeSink::new(libc::STDERR_FILENO);

/// Buffered writer usable from a signal handler
pub struct SignalSafeSink<const N: usize> {
    fd: libc::c_int,
    buf: UnsafeCell<[u8; N]>,
    len: UnsafeCell<usize>,
}

// SAFETY: callers serialize access through the handler admission slot; the
// sink itself never hands out references that outlive a single call.
unsafe impl<const N: usize> Sync for SignalSafeSink<N> {}

impl<const N: usize> SignalSafeSink<N> {
    #[must_use]
    pub const fn new(fd: libc::c_int) -> Self {
        Self { fd, buf: UnsafeCell::new([0; N]), len: UnsafeCell::new(0) }
    }

    /// Append bytes, flushing first if they don't fit
    ///
    /// Payloads larger than the whole buffer bypass it.
    pub fn print(&self, bytes: &[u8]) {
        if self.pending() + bytes.len() > N {
            self.write_pending();
            if bytes.len() > N {
                write_all(self.fd, bytes);
                return;
            }
        }

        // SAFETY: single writer (see module docs); no other reference into
        // the buffer is live during this call.
        unsafe {
            let len = &mut *self.len.get();
            let buf = &mut *self.buf.get();
            buf[*len..*len + bytes.len()].copy_from_slice(bytes);
            *len += bytes.len();
        }
    }

    pub fn print_dec(&self, val: u64) {
        let mut buf = [0u8; DEC_BUF_LEN];
        self.print(format_dec(val, &mut buf));
    }

    pub fn print_hex(&self, val: u64) {
        let mut buf = [0u8; HEX_BUF_LEN];
        self.print(format_hex(val, &mut buf));
    }

    /// Write out pending bytes, then `fsync` in case we crash again
    ///
    /// `fsync` fails with `EINVAL` on pipes and terminals; that is ignored.
    pub fn flush(&self) {
        self.write_pending();
        // SAFETY: fsync on any descriptor value is memory-safe
        unsafe {
            libc::fsync(self.fd);
        }
    }

    /// Number of buffered, unwritten bytes
    #[must_use]
    pub fn pending(&self) -> usize {
        // SAFETY: plain read of a usize owned by this sink
        unsafe { *self.len.get() }
    }

    fn write_pending(&self) {
        // SAFETY: as in `print`; the length is reset only after the write
        // so a nested flush from the same thread sees consistent state.
        unsafe {
            let len = *self.len.get();
            if len == 0 {
                return;
            }
            let buf = &*self.buf.get();
            write_all(self.fd, &buf[..len]);
            *self.len.get() = 0;
        }
    }
}

/// Flushes the sink when dropped, covering early returns
pub(crate) struct FlushOnDrop<'a, const N: usize>(&'a SignalSafeSink<N>);

impl<'a, const N: usize> FlushOnDrop<'a, N> {
    pub(crate) fn new(sink: &'a SignalSafeSink<N>) -> Self {
        Self(sink)
    }
}

impl<const N: usize> Drop for FlushOnDrop<'_, N> {
    fn drop(&mut self) {
        self.0.flush();
    }
}

/// `write(2)` until done, retrying on `EINTR`; other errors drop the output
fn write_all(fd: libc::c_int, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: pointer and length come from a live slice
        let ret = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if ret < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return;
        }
        if ret == 0 {
            return;
        }
        // ret is positive and at most bytes.len()
        #[allow(clippy::cast_sign_loss)]
        let written = ret as usize;
        bytes = &bytes[written..];
    }
}
