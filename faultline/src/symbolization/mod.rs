//! # Symbol Resolution for Crash Reports
//!
//! This module turns the raw return addresses captured by the fatal signal
//! handler (`0x55f3a2b4c780`) into function names and, for the main
//! executable, source locations. The hard constraint is *where* that
//! translation has to run: inside a signal handler, possibly on a thread
//! that just corrupted its heap or overflowed its stack.
//!
//! ## Two Phases
//!
//! ```text
//! install time (normal context)          crash time (signal context)
//! ─────────────────────────────          ───────────────────────────
//! read /proc/self/maps                   binary search image by address
//! parse ELF symbols (object)       ──▶   binary search symbol table
//! parse DWARF lines (addr2line)          binary search line table
//! demangle (rustc-demangle)              print borrowed &str slices
//! sort everything, publish OnceLock
//! ```
//!
//! Everything that allocates, opens files or parses happens in the first
//! column. The second column only reads immutable tables, so it is safe in
//! a handler and safe from several threads at once.
//!
//! ## Load Bias
//!
//! Symbols and DWARF rows carry **link-time** virtual addresses. Captured
//! frames are **runtime** addresses. For each mapped object:
//!
//! ```text
//! bias         = runtime start of the offset-0 mapping
//!              - page-aligned lowest PT_LOAD vaddr
//! link address = runtime address - bias
//! ```
//!
//! This covers PIE executables (lowest vaddr 0), shared libraries, and
//! fixed-address executables (bias 0).
//!
//! ## Return Addresses
//!
//! A captured frame is the instruction *after* a call. When the call is the
//! last instruction of a function, that address already belongs to the next
//! function. [`Symbolizer::resolve_return_address`] looks up `addr - 1` to
//! land on the call itself; offsets are still reported against `addr`.
//!
//! ## Module Structure
//!
//! - **`memory_maps`**: `/proc/self/maps` parsing, merged per file
//! - **`symbolizer`**: table construction and allocation-free lookup
//!
//! ## Example
//!
//! ```rust,ignore
//! let symbolizer = Symbolizer::from_current_process(500, true)?;
//! let frame = symbolizer.resolve_return_address(0x55f3a2b4c780);
//! // frame.name   = Some("my_app::worker::run")
//! // frame.offset = 0x2a
//! // frame.file   = Some("src/worker.rs"), frame.line = Some(88)
//! ```

pub mod memory_maps;
pub mod symbolizer;

use std::sync::OnceLock;

pub use memory_maps::{parse_mapped_objects, read_mapped_objects, MappedObject, MemoryRange};
pub use symbolizer::{SymbolTable, SymbolizedFrame, Symbolizer};

/// The symbolizer used by the fatal signal handler
static SYMBOLIZER: OnceLock<Symbolizer> = OnceLock::new();

/// Publish the process-wide symbolizer; false if one was already published
pub(crate) fn publish(symbolizer: Symbolizer) -> bool {
    SYMBOLIZER.set(symbolizer).is_ok()
}

/// The published symbolizer, if install built one
#[must_use]
pub fn global() -> Option<&'static Symbolizer> {
    SYMBOLIZER.get()
}
