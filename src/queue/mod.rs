//! Embedded lease-based message queue.
//!
//! Messages are published as `pending`, handed out under a time-bounded
//! lease, and deleted on acknowledgement. Expired leases are reclaimed at the
//! start of every lease call, which is the only crash-recovery mechanism: a
//! consumer that dies holding a lease simply lets it lapse.

mod clock;
mod error;
mod id;
mod store;

pub use clock::{Clock, SystemClock};
pub use error::{QueueError, Result};
pub use id::{message_id, MESSAGE_ID_LEN};
pub use store::{QueueDepth, QueueStore};

/// Queue the worker drains.
pub const REQUESTS_QUEUE: &str = "requests";

/// Queue the worker publishes outcomes to.
pub const RESULTS_QUEUE: &str = "results";

/// Longest accepted queue name.
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Check that a queue name is non-empty and made of `[A-Za-z0-9_.-]`.
pub fn validate_queue_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_QUEUE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidQueueName(name.to_string()))
    }
}
