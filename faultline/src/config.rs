//! Install-time configuration
//!
//! Everything here is consumed once, by the installer, before any handler is
//! registered. Nothing on the crash path reads configuration.

use faultline_common::DEFAULT_SYMBOL_CACHE_CAPACITY;

/// Default alternate signal stack size (256 KiB)
///
/// Large enough for the unwinder plus symbol lookups when the faulting
/// thread has exhausted its own stack.
pub const DEFAULT_ALTERNATE_STACK_SIZE: usize = 256 << 10;

/// Options for [`install_fatal_signal_handler_with`](crate::install_fatal_signal_handler_with)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Build a symbolizer at install time and symbolize crash reports
    ///
    /// When disabled, reports list raw return addresses only.
    pub symbolize: bool,

    /// Include DWARF file:line information for the main executable
    ///
    /// Costs one pass over the executable's line programs at install time.
    pub line_tables: bool,

    /// Maximum number of mapped ELF objects the symbolizer indexes
    pub symbol_cache_capacity: usize,

    /// Alternate signal stack for the installing thread (`None` keeps
    /// whatever the thread already has)
    pub alternate_stack_size: Option<usize>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            symbolize: true,
            line_tables: true,
            symbol_cache_capacity: DEFAULT_SYMBOL_CACHE_CAPACITY,
            alternate_stack_size: Some(DEFAULT_ALTERNATE_STACK_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HandlerConfig::default();
        assert!(config.symbolize);
        assert!(config.line_tables);
        assert_eq!(config.symbol_cache_capacity, 500);
        assert_eq!(config.alternate_stack_size, Some(256 * 1024));
    }
}
