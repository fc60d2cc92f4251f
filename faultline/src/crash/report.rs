//! Crash report assembly
//!
//! Each step writes through the signal-safe sink and flushes on every exit
//! path, so a report cut short by a second fault still reaches the stream.
//!
//! ```text
//! *** Aborted at 1760659200 (Unix time, try 'date -d @1760659200') ***
//! *** Signal 11 (SIGSEGV) (0x8) received by PID 4242 (pthread TID 0x7f...)
//!     (linux TID 4242) (code: address not mapped to object), stack trace: ***
//!     @ 000055f3a2b4c780 faultline::crash::handler::signal_handler + 0x40
//!                        faultline/src/crash/handler.rs:112
//!     @ 00007f8b3c0429f0 (unknown) in /usr/lib/libc.so.6
//! ```

#![allow(unsafe_code)] // time, siginfo_t accessors

use faultline_common::{reason, signal_name, AddressFormatter, SI_KERNEL, SKIPPED_INNER_FRAMES};

use super::capture::{capture_frames, CapturedFrames};
use super::sink::{FlushOnDrop, SignalSafeSink};
use crate::domain::{ThreadToken, Tid};
use crate::symbolization::Symbolizer;

/// Indent of the `file:line` continuation line, aligned under the name
const LOCATION_INDENT: &[u8] = b"                       ";

/// Writes the sections of a crash report to a sink
pub struct Report<'a, const N: usize> {
    sink: &'a SignalSafeSink<N>,
}

impl<'a, const N: usize> Report<'a, N> {
    #[must_use]
    pub const fn new(sink: &'a SignalSafeSink<N>) -> Self {
        Self { sink }
    }

    /// `*** Aborted at <t> (Unix time, try 'date -d @<t>') ***`
    pub fn dump_time_info(&self) {
        let _flush = FlushOnDrop::new(self.sink);
        // SAFETY: time(NULL) only returns the clock value
        let now = u64::try_from(unsafe { libc::time(std::ptr::null_mut()) }).unwrap_or(0);
        self.sink.print(b"*** Aborted at ");
        self.sink.print_dec(now);
        self.sink.print(b" (Unix time, try 'date -d @");
        self.sink.print_dec(now);
        self.sink.print(b"') ***\n");
    }

    /// Signal, fault address, who received it and, when known, who sent it
    pub fn dump_signal_info(&self, signum: libc::c_int, info: Option<&libc::siginfo_t>) {
        let _flush = FlushOnDrop::new(self.sink);
        let sink = self.sink;

        sink.print(b"*** Signal ");
        sink.print_dec(u64::try_from(signum).unwrap_or(0));
        if let Some(name) = signal_name(signum) {
            sink.print(b" (");
            sink.print(name.as_bytes());
            sink.print(b")");
        }

        sink.print(b" (");
        // SAFETY: si_addr reads the union member the kernel filled for
        // fault signals; for other signals it is just an integer
        let addr = info.map_or(0, |info| unsafe { info.si_addr() } as usize);
        sink.print_hex(addr as u64);
        sink.print(b") received by PID ");
        // SAFETY: getpid cannot fail
        sink.print_dec(u64::try_from(unsafe { libc::getpid() }).unwrap_or(0));
        sink.print(b" (pthread TID ");
        sink.print_hex(ThreadToken::current().0 as u64);
        sink.print(b") (linux TID ");
        sink.print_dec(u64::try_from(Tid::current().0).unwrap_or(0));

        if let Some(info) = info {
            // Kernel-sourced signals carry no useful sender
            if info.si_code != SI_KERNEL {
                sink.print(b") (maybe from PID ");
                // SAFETY: plain integer reads of the siginfo union
                let (pid, uid) = unsafe { (info.si_pid(), info.si_uid()) };
                sink.print_dec(u64::try_from(pid).unwrap_or(0));
                sink.print(b", UID ");
                sink.print_dec(u64::from(uid));
            }

            if let Some(reason) = reason(signum, info.si_code) {
                sink.print(b") (code: ");
                sink.print(reason.as_bytes());
            }
        }

        sink.print(b"), stack trace: ***\n");
    }

    /// Capture and print the current stack
    ///
    /// With a symbolizer each frame is resolved, skipping the capture
    /// machinery on top; without one only raw addresses are printed.
    #[inline(never)]
    pub fn dump_stack_trace(&self, symbolizer: Option<&Symbolizer>) {
        let mut frames = CapturedFrames::new();
        let captured = capture_frames(&mut frames).then_some(&frames);
        self.print_stack_trace(captured, symbolizer);
    }

    /// Print frames captured by [`dump_stack_trace`](Self::dump_stack_trace);
    /// `None` means the capture failed
    pub fn print_stack_trace(&self, captured: Option<&CapturedFrames>, symbolizer: Option<&Symbolizer>) {
        let _flush = FlushOnDrop::new(self.sink);

        let Some(frames) = captured else {
            self.sink.print(b"(error retrieving stack trace)\n");
            return;
        };

        if let Some(symbolizer) = symbolizer {
            let skip = SKIPPED_INNER_FRAMES.min(frames.len());
            for &addr in &frames.as_slice()[skip..] {
                self.print_symbolized(symbolizer, addr);
            }
        } else {
            self.sink.print(b"(safe mode, symbolizer not available)\n");
            let mut formatter = AddressFormatter::new();
            for &addr in frames.as_slice() {
                self.sink.print(formatter.format(addr as u64));
                self.sink.print(b"\n");
            }
        }
    }

    /// One-line notice for a fault inside the handler itself
    pub fn print_recursion_warning(&self) {
        self.sink.print(b"Entered fatal signal handler recursively. We're in trouble.\n");
    }

    fn print_symbolized(&self, symbolizer: &Symbolizer, addr: usize) {
        let sink = self.sink;
        let frame = symbolizer.resolve_return_address(addr as u64);
        let mut formatter = AddressFormatter::new();
        sink.print(formatter.format(frame.addr));

        if let Some(name) = frame.name {
            sink.print(b" ");
            sink.print(name.as_bytes());
            if frame.offset != 0 {
                sink.print(b" + ");
                sink.print_hex(frame.offset);
            }
        } else {
            sink.print(b" (unknown)");
            if let Some(object) = frame.object {
                sink.print(b" in ");
                sink.print(object.as_bytes());
            }
        }
        sink.print(b"\n");

        if let (Some(file), Some(line)) = (frame.file, frame.line) {
            sink.print(LOCATION_INDENT);
            sink.print(file.as_bytes());
            sink.print(b":");
            sink.print_dec(u64::from(line));
            sink.print(b"\n");
        }
    }
}
