//! Domain model for faultline
//!
//! Newtypes for the identifiers that flow through the crash path, plus the
//! structured errors raised while setting it up.

pub mod errors;
pub mod types;

pub use types::{Signal, ThreadToken, Tid};

pub use errors::{InstallError, StackError};
