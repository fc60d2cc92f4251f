//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{HandlerConfig, DEFAULT_ALTERNATE_STACK_SIZE};
use faultline_common::DEFAULT_SYMBOL_CACHE_CAPACITY;

#[derive(Parser, Debug)]
#[command(
    name = "faultline",
    about = "Install the fatal signal handler, then crash on purpose",
    after_help = "\
EXAMPLES:
    faultline --fault segv --marker /tmp/m     Real invalid read, callback writes a marker
    faultline --fault term --threads 4 \\
        --prior ignore --callback-delay-ms 200 Four concurrent reports, then exit 0
    faultline --fault term --nested abort      Fault inside the handler
    faultline --overflow                       Stack overflow on an alternate stack"
)]
pub struct Args {
    /// Signal to deliver
    #[arg(long, value_enum, default_value_t = Fault::Segv)]
    pub fault: Fault,

    /// Number of threads delivering the fault at once
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=64))]
    pub threads: u32,

    /// Append "marker <linux tid>" to FILE from a fatal signal callback
    #[arg(long, value_name = "FILE")]
    pub marker: Option<PathBuf>,

    /// Sleep inside the callback, holding the handler
    #[arg(long, value_name = "MS", default_value = "0")]
    pub callback_delay_ms: u64,

    /// Raise further signals from inside the callback
    #[arg(long, value_enum, default_value_t = Nested::None)]
    pub nested: Nested,

    /// Number of nested signals for `--nested chain`
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=4))]
    pub nested_count: u32,

    /// Disposition to install before the handler, restored on re-raise
    #[arg(long, value_enum, default_value_t = Prior::Default)]
    pub prior: Prior,

    /// Print raw addresses only
    #[arg(long)]
    pub no_symbolize: bool,

    /// Skip DWARF file:line information
    #[arg(long)]
    pub no_line_tables: bool,

    /// Alternate signal stack size for the installing thread (0 = none)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_ALTERNATE_STACK_SIZE)]
    pub alt_stack_size: usize,

    /// Maximum number of mapped objects to index for symbolization
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SYMBOL_CACHE_CAPACITY)]
    pub symbol_cache_capacity: usize,

    /// Call the installer a second time before delivering the fault
    #[arg(long)]
    pub install_twice: bool,

    /// Overflow the stack of a thread with an alternate signal stack
    #[arg(long, conflicts_with_all = ["fault", "threads"])]
    pub overflow: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Read from an unmapped address
    Segv,
    Ill,
    Fpe,
    Abort,
    Bus,
    Term,
}

impl Fault {
    #[must_use]
    pub fn signal(self) -> libc::c_int {
        match self {
            Fault::Segv => libc::SIGSEGV,
            Fault::Ill => libc::SIGILL,
            Fault::Fpe => libc::SIGFPE,
            Fault::Abort => libc::SIGABRT,
            Fault::Bus => libc::SIGBUS,
            Fault::Term => libc::SIGTERM,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nested {
    None,
    /// `SIGABRT` from the callback
    Abort,
    /// `SIGFPE`, `SIGILL`, `SIGBUS`, `SIGSEGV` in turn, up to `--nested-count`
    Chain,
}

impl Nested {
    /// Signals raised from inside the callback
    #[must_use]
    pub fn signals(self, count: u32) -> &'static [libc::c_int] {
        const CHAIN: [libc::c_int; 4] = [libc::SIGFPE, libc::SIGILL, libc::SIGBUS, libc::SIGSEGV];
        match self {
            Nested::None => &[],
            Nested::Abort => &[libc::SIGABRT],
            Nested::Chain => &CHAIN[..(count as usize).min(CHAIN.len())],
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prior {
    /// Keep what the runtime installed
    Inherit,
    /// `SIG_DFL` for every monitored signal
    Default,
    /// `SIG_IGN` for `SIGTERM`, `SIG_DFL` for the rest
    Ignore,
    /// A handler that returns, for every monitored signal but `SIGSEGV`
    Noop,
}

impl Args {
    /// Library configuration for these arguments
    #[must_use]
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            symbolize: !self.no_symbolize,
            line_tables: !self.no_line_tables,
            symbol_cache_capacity: self.symbol_cache_capacity,
            alternate_stack_size: (self.alt_stack_size > 0).then_some(self.alt_stack_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["faultline"]);
        assert_eq!(args.fault, Fault::Segv);
        assert_eq!(args.threads, 1);
        assert_eq!(args.prior, Prior::Default);
        assert!(!args.install_twice);
        assert_eq!(args.handler_config(), HandlerConfig::default());
    }

    #[test]
    fn test_handler_config_mapping() {
        let args = Args::parse_from([
            "faultline",
            "--no-symbolize",
            "--alt-stack-size",
            "0",
            "--symbol-cache-capacity",
            "3",
        ]);
        let config = args.handler_config();
        assert!(!config.symbolize);
        assert!(config.line_tables);
        assert_eq!(config.alternate_stack_size, None);
        assert_eq!(config.symbol_cache_capacity, 3);
    }

    #[test]
    fn test_nested_signals() {
        assert!(Nested::None.signals(3).is_empty());
        assert_eq!(Nested::Abort.signals(3), &[libc::SIGABRT]);
        assert_eq!(Nested::Chain.signals(2), &[libc::SIGFPE, libc::SIGILL]);
        assert_eq!(Nested::Chain.signals(4).len(), 4);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Args::try_parse_from(["faultline", "--fault", "kill"]).is_err());
        assert!(Args::try_parse_from(["faultline", "--threads", "0"]).is_err());
        assert!(Args::try_parse_from(["faultline", "--overflow", "--threads", "2"]).is_err());
    }
}
