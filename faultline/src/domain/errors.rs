//! Structured error types for faultline
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Signal;
use std::io;
use thiserror::Error;

/// Failure to register the fatal signal handler
///
/// There is no safe degraded mode for these: the installer aborts the
/// process after reporting one.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to install fatal signal handler for {signal}: {source}")]
    SigactionFailed {
        signal: Signal,
        #[source]
        source: io::Error,
    },
}

/// Failure to set up guarded stack memory or an alternate signal stack
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Failed to map {size} bytes of stack memory: {source}")]
    MapFailed {
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("Failed to protect guard page at 0x{addr:x}: {source}")]
    ProtectFailed {
        addr: usize,
        #[source]
        source: io::Error,
    },

    #[error("Stack allocation of {0} bytes failed")]
    AllocationFailed(usize),

    #[error("Alternate signal stack of {size} bytes is below the minimum of {min} bytes")]
    TooSmall { size: usize, min: usize },

    #[error("sigaltstack failed: {0}")]
    Sigaltstack(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_error_display() {
        let err = InstallError::SigactionFailed {
            signal: Signal(libc::SIGBUS),
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        let msg = err.to_string();
        assert!(msg.contains("SIGBUS"));
        assert!(msg.starts_with("Failed to install fatal signal handler"));
    }

    #[test]
    fn test_stack_error_display() {
        let err = StackError::TooSmall { size: 1024, min: 8192 };
        assert_eq!(
            err.to_string(),
            "Alternate signal stack of 1024 bytes is below the minimum of 8192 bytes"
        );

        let err = StackError::ProtectFailed {
            addr: 0x7f00_0000_0000,
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        };
        assert!(err.to_string().contains("0x7f0000000000"));
    }
}
