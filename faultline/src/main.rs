//! # faultline - Crash Drill
//!
//! Installs the fatal signal handler the way an application would, then
//! delivers a fatal signal on purpose so the report, the callbacks and the
//! final re-raise can be observed from outside the process.
//!
//! If the prior disposition returns instead of killing the process
//! (`--prior ignore`, `--prior noop`, or a runtime handler with
//! `--prior inherit`) the drill exits with status 0.

#![allow(unsafe_code)] // sigaction, raise, raw writes from callbacks

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::os::fd::IntoRawFd;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, OnceLock};

use faultline::cli::{Args, Fault, Prior};
use faultline::crash::{add_fatal_signal_callback, install_fatal_signal_callbacks, is_installed};
use faultline::stack::ensure_alternate_stack;
use faultline::{format_dec, install_fatal_signal_handler_with, DEC_BUF_LEN, FATAL_SIGNALS};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

/// Stack size for the `--overflow` thread
const OVERFLOW_THREAD_STACK: usize = 512 << 10;

/// Descriptor the marker callback appends to (-1 = none)
static MARKER_FD: AtomicI32 = AtomicI32::new(-1);

/// How long the delay callback holds the handler
static CALLBACK_DELAY_MS: AtomicU64 = AtomicU64::new(0);

/// Signals the nested callback raises
static NESTED_SIGNALS: OnceLock<&'static [libc::c_int]> = OnceLock::new();

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    // Usage errors exit with status 2 from clap
    let args = Args::parse();
    debug!("{args:?}");

    set_prior_dispositions(args.prior)?;
    register_callbacks(&args)?;
    let config = args.handler_config();
    install_fatal_signal_handler_with(&config);
    if args.install_twice {
        install_fatal_signal_handler_with(&config);
    }
    if !is_installed() {
        bail!("Fatal signal handler was not installed");
    }

    if args.overflow {
        overflow(args.alt_stack_size)?;
    } else {
        deliver(args.fault, args.threads, args.alt_stack_size)?;
    }

    info!("Prior disposition returned, exiting normally");
    Ok(())
}

fn register_callbacks(args: &Args) -> Result<()> {
    if let Some(path) = &args.marker {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open marker file: {}", path.display()))?;
        MARKER_FD.store(file.into_raw_fd(), Ordering::Release);
        add_fatal_signal_callback(write_marker);
    }

    if args.callback_delay_ms > 0 {
        CALLBACK_DELAY_MS.store(args.callback_delay_ms, Ordering::Release);
        add_fatal_signal_callback(hold_handler);
    }

    let nested = args.nested.signals(args.nested_count);
    if !nested.is_empty() {
        let _ = NESTED_SIGNALS.set(nested);
        add_fatal_signal_callback(raise_nested);
    }

    install_fatal_signal_callbacks();
    Ok(())
}

/// Append "marker <linux tid>\n" with a single write
fn write_marker() {
    let fd = MARKER_FD.load(Ordering::Acquire);
    if fd < 0 {
        return;
    }

    const PREFIX: &[u8] = b"marker ";
    let mut line = [0u8; 32];
    let mut digits = [0u8; DEC_BUF_LEN];
    // SAFETY: gettid takes no arguments
    let tid = u64::try_from(unsafe { libc::syscall(libc::SYS_gettid) }).unwrap_or(0);
    let tid = format_dec(tid, &mut digits);

    line[..PREFIX.len()].copy_from_slice(PREFIX);
    let mut len = PREFIX.len();
    line[len..len + tid.len()].copy_from_slice(tid);
    len += tid.len();
    line[len] = b'\n';
    len += 1;

    // SAFETY: write from a live stack buffer
    unsafe {
        libc::write(fd, line.as_ptr().cast(), len);
    }
}

fn hold_handler() {
    let ms = CALLBACK_DELAY_MS.load(Ordering::Acquire);
    let ts = libc::timespec {
        tv_sec: libc::time_t::try_from(ms / 1000).unwrap_or(0),
        tv_nsec: libc::c_long::try_from((ms % 1000) * 1_000_000).unwrap_or(0),
    };
    // SAFETY: nanosleep is async-signal-safe
    unsafe {
        libc::nanosleep(&ts, std::ptr::null_mut());
    }
}

fn raise_nested() {
    for &signum in NESTED_SIGNALS.get().copied().unwrap_or_default() {
        // SAFETY: raise is async-signal-safe
        unsafe {
            libc::raise(signum);
        }
    }
}

extern "C" fn noop_handler(_signum: libc::c_int, _info: *mut libc::siginfo_t, _uctx: *mut libc::c_void) {}

fn set_prior_dispositions(prior: Prior) -> Result<()> {
    let noop: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) = noop_handler;

    for signal in FATAL_SIGNALS {
        let handler = match prior {
            Prior::Inherit => continue,
            Prior::Default => libc::SIG_DFL,
            Prior::Ignore if signal.number == libc::SIGTERM => libc::SIG_IGN,
            Prior::Ignore => libc::SIG_DFL,
            Prior::Noop if signal.number == libc::SIGSEGV => libc::SIG_DFL,
            Prior::Noop => noop as libc::sighandler_t,
        };

        // SAFETY: all-zero is a valid sigaction
        let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
        sa.sa_sigaction = handler;
        if prior == Prior::Noop {
            sa.sa_flags = libc::SA_SIGINFO;
        }
        // SAFETY: sa is fully initialized; the old action is not needed
        let ret = unsafe {
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(signal.number, &sa, std::ptr::null_mut())
        };
        if ret != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("Failed to set prior disposition for {}", signal.name));
        }
    }

    debug!("Prior dispositions: {prior:?}");
    Ok(())
}

/// Deliver `fault` from `threads` threads released together
///
/// Each thread gets its own alternate signal stack first, as the installing
/// thread did.
fn deliver(fault: Fault, threads: u32, alt_stack_size: usize) -> Result<()> {
    if threads == 1 {
        trigger(fault);
        return Ok(());
    }

    let barrier = Arc::new(Barrier::new(threads as usize));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            std::thread::Builder::new()
                .name(format!("fault-{i}"))
                .spawn(move || {
                    give_thread_alternate_stack(alt_stack_size);
                    barrier.wait();
                    trigger(fault);
                })
                .context("Failed to spawn fault thread")
        })
        .collect::<Result<_>>()?;

    for handle in handles {
        if handle.join().is_err() {
            bail!("Fault thread panicked");
        }
    }
    Ok(())
}

fn trigger(fault: Fault) {
    match fault {
        Fault::Segv => {
            let addr = std::hint::black_box(8usize) as *const u8;
            // SAFETY: none; this read is meant to fault
            let byte = unsafe { std::ptr::read_volatile(addr) };
            std::hint::black_box(byte);
        }
        other => {
            // SAFETY: raise has no memory-safety preconditions
            unsafe {
                libc::raise(other.signal());
            }
        }
    }
}

/// Recurse without bound on a thread that has an alternate signal stack
fn overflow(alt_stack_size: usize) -> Result<()> {
    let handle = std::thread::Builder::new()
        .name("overflow".into())
        .stack_size(OVERFLOW_THREAD_STACK)
        .spawn(move || {
            give_thread_alternate_stack(alt_stack_size);
            recurse(0)
        })
        .context("Failed to spawn overflow thread")?;

    let depth = handle.join().map_err(|_| anyhow::anyhow!("Overflow thread panicked"))?;
    bail!("Stack did not overflow after {depth} frames")
}

fn give_thread_alternate_stack(size: usize) {
    if size == 0 {
        return;
    }
    match ensure_alternate_stack(size) {
        Ok(Some(stack)) => stack.leak(),
        Ok(None) => {}
        Err(e) => warn!("No alternate signal stack for this thread: {e}"),
    }
}

#[inline(never)]
fn recurse(depth: u64) -> u64 {
    let frame = std::hint::black_box([0u8; 1024]);
    if depth == u64::MAX {
        return depth;
    }
    recurse(depth + 1) + u64::from(frame[0])
}
