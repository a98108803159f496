//! tablequeue - embedded lease-based work queue and table extraction worker.
//!
//! A local emulation of a visibility-timeout queue backed by SQLite, plus the
//! bounded-concurrency worker that drains the `requests` queue into the
//! `results` queue.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod config;
pub mod models;
pub mod processor;
pub mod queue;
pub mod server;
pub mod utils;
pub mod worker;
