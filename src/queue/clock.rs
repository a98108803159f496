//! Time source used for lease bookkeeping.

use chrono::{DateTime, Utc};

/// Source of "now" for the queue store.
///
/// Production code uses [`SystemClock`]; tests substitute a manual clock to
/// step across lease boundaries without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
