//! Command-line interface of the `faultline` drill binary

pub mod args;

pub use args::{Args, Fault, Nested, Prior};
