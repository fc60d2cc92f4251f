//! Fault reason decoding
//!
//! Maps `(signal, si_code)` to the description from `sigaction(2)`. The
//! lookup is a linear scan over `const` tables; unknown signals and codes
//! decode to `None`.
//!
//! The `si_code` values are the Linux generic ABI values
//! (`include/uapi/asm-generic/siginfo.h`), which every architecture shares
//! for these signals.

use libc::c_int;

/// `si_code` values for the signals we decode
pub mod codes {
    use libc::c_int;

    pub const ILL_ILLOPC: c_int = 1;
    pub const ILL_ILLOPN: c_int = 2;
    pub const ILL_ILLADR: c_int = 3;
    pub const ILL_ILLTRP: c_int = 4;
    pub const ILL_PRVOPC: c_int = 5;
    pub const ILL_PRVREG: c_int = 6;
    pub const ILL_COPROC: c_int = 7;
    pub const ILL_BADSTK: c_int = 8;

    pub const FPE_INTDIV: c_int = 1;
    pub const FPE_INTOVF: c_int = 2;
    pub const FPE_FLTDIV: c_int = 3;
    pub const FPE_FLTOVF: c_int = 4;
    pub const FPE_FLTUND: c_int = 5;
    pub const FPE_FLTRES: c_int = 6;
    pub const FPE_FLTINV: c_int = 7;
    pub const FPE_FLTSUB: c_int = 8;

    pub const SEGV_MAPERR: c_int = 1;
    pub const SEGV_ACCERR: c_int = 2;

    pub const BUS_ADRALN: c_int = 1;
    pub const BUS_ADRERR: c_int = 2;
    pub const BUS_OBJERR: c_int = 3;

    pub const TRAP_BRKPT: c_int = 1;
    pub const TRAP_TRACE: c_int = 2;

    pub const CLD_EXITED: c_int = 1;
    pub const CLD_KILLED: c_int = 2;
    pub const CLD_DUMPED: c_int = 3;
    pub const CLD_TRAPPED: c_int = 4;
    pub const CLD_STOPPED: c_int = 5;
    pub const CLD_CONTINUED: c_int = 6;

    pub const POLL_IN: c_int = 1;
    pub const POLL_OUT: c_int = 2;
    pub const POLL_MSG: c_int = 3;
    pub const POLL_ERR: c_int = 4;
    pub const POLL_PRI: c_int = 5;
    pub const POLL_HUP: c_int = 6;
}

use codes::*;

type ReasonTable = &'static [(c_int, &'static str)];

const SIGILL_REASONS: ReasonTable = &[
    (ILL_ILLOPC, "illegal opcode"),
    (ILL_ILLOPN, "illegal operand"),
    (ILL_ILLADR, "illegal addressing mode"),
    (ILL_ILLTRP, "illegal trap"),
    (ILL_PRVOPC, "privileged opcode"),
    (ILL_PRVREG, "privileged register"),
    (ILL_COPROC, "coprocessor error"),
    (ILL_BADSTK, "internal stack error"),
];

const SIGFPE_REASONS: ReasonTable = &[
    (FPE_INTDIV, "integer divide by zero"),
    (FPE_INTOVF, "integer overflow"),
    (FPE_FLTDIV, "floating-point divide by zero"),
    (FPE_FLTOVF, "floating-point overflow"),
    (FPE_FLTUND, "floating-point underflow"),
    (FPE_FLTRES, "floating-point inexact result"),
    (FPE_FLTINV, "floating-point invalid operation"),
    (FPE_FLTSUB, "subscript out of range"),
];

const SIGSEGV_REASONS: ReasonTable = &[
    (SEGV_MAPERR, "address not mapped to object"),
    (SEGV_ACCERR, "invalid permissions for mapped object"),
];

// BUS_MCEERR_AR / BUS_MCEERR_AO are machine-check codes we don't decode.
const SIGBUS_REASONS: ReasonTable = &[
    (BUS_ADRALN, "invalid address alignment"),
    (BUS_ADRERR, "nonexistent physical address"),
    (BUS_OBJERR, "object-specific hardware error"),
];

const SIGTRAP_REASONS: ReasonTable =
    &[(TRAP_BRKPT, "process breakpoint"), (TRAP_TRACE, "process trace trap")];

const SIGCHLD_REASONS: ReasonTable = &[
    (CLD_EXITED, "child has exited"),
    (CLD_KILLED, "child was killed"),
    (CLD_DUMPED, "child terminated abnormally"),
    (CLD_TRAPPED, "traced child has trapped"),
    (CLD_STOPPED, "child has stopped"),
    (CLD_CONTINUED, "stopped child has continued"),
];

const SIGIO_REASONS: ReasonTable = &[
    (POLL_IN, "data input available"),
    (POLL_OUT, "output buffers available"),
    (POLL_MSG, "input message available"),
    (POLL_ERR, "I/O error"),
    (POLL_PRI, "high priority input available"),
    (POLL_HUP, "device disconnected"),
];

/// Per-signal tables; `SIGIO` is also `SIGPOLL`
const REASONS_BY_SIGNAL: &[(c_int, ReasonTable)] = &[
    (libc::SIGILL, SIGILL_REASONS),
    (libc::SIGFPE, SIGFPE_REASONS),
    (libc::SIGSEGV, SIGSEGV_REASONS),
    (libc::SIGBUS, SIGBUS_REASONS),
    (libc::SIGTRAP, SIGTRAP_REASONS),
    (libc::SIGCHLD, SIGCHLD_REASONS),
    (libc::SIGIO, SIGIO_REASONS),
];

/// Describe why `signum` was delivered, given the `si_code` from `siginfo_t`
#[must_use]
pub fn reason(signum: c_int, si_code: c_int) -> Option<&'static str> {
    let (_, table) = REASONS_BY_SIGNAL.iter().find(|(sig, _)| *sig == signum)?;
    table.iter().find(|(code, _)| *code == si_code).map(|(_, text)| *text)
}
