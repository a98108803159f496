//! Command-line interface for tablequeue.

mod commands;
pub mod icons;

pub use commands::{is_verbose, run};
