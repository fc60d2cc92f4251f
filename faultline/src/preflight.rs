//! Pre-flight checks for faultline
//!
//! Inspects the running executable before the handler is installed and
//! warns when crash reports will be less useful than they could be.
//! Nothing here is fatal: a stripped binary still gets raw addresses.

use anyhow::{Context, Result};
use log::{debug, warn};
use object::{Object, ObjectSection};
use std::path::Path;

/// What the symbolizer will have to work with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugInfo {
    /// `.debug_info` present: names plus file:line
    Full,
    /// Symbol table only: names without source locations
    SymbolsOnly,
    /// Stripped: addresses only
    Stripped,
}

/// Check `/proc/self/exe` and log what crash reports will contain
pub fn check_current_executable() {
    match check_debug_symbols("/proc/self/exe") {
        Ok(DebugInfo::Full) => debug!("Executable has DWARF debug info"),
        Ok(DebugInfo::SymbolsOnly) => {
            warn!("No DWARF debug info, crash reports will lack source locations");
        }
        Ok(DebugInfo::Stripped) => {
            warn!("Executable is stripped, crash reports will show addresses only");
        }
        Err(e) => debug!("Skipping debug symbol check: {e:#}"),
    }
}

/// Classify the debug information carried by a binary
///
/// # Errors
/// Returns an error if the file cannot be read or is not an object file
pub fn check_debug_symbols<P: AsRef<Path>>(target_path: P) -> Result<DebugInfo> {
    let target_path = target_path.as_ref();
    let file_data = std::fs::read(target_path)
        .with_context(|| format!("Failed to read binary: {}", target_path.display()))?;

    let obj = object::File::parse(&*file_data)
        .with_context(|| format!("Not an object file: {}", target_path.display()))?;

    // Check for .debug_info section (DWARF debug info)
    let has_debug_info = obj.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);

    // Check for .symtab (symbol table - present in non-stripped binaries)
    let has_symtab = obj.section_by_name(".symtab").is_some_and(|s| s.size() > 0);

    Ok(if has_debug_info {
        DebugInfo::Full
    } else if has_symtab {
        DebugInfo::SymbolsOnly
    } else {
        DebugInfo::Stripped
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_not_found() {
        let result = check_debug_symbols("/nonexistent/path/to/binary");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to read binary"));
    }

    #[test]
    fn test_not_an_object_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"#!/bin/sh\necho hi\n").unwrap();
        let err = check_debug_symbols(file.path()).unwrap_err().to_string();
        assert!(err.contains("Not an object file"));
    }

    #[test]
    fn test_test_binary_has_symbols() {
        // Test builds keep at least the symbol table
        let info = check_debug_symbols("/proc/self/exe").unwrap();
        assert_ne!(info, DebugInfo::Stripped);
        check_current_executable();
    }
}
