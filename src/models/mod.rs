//! Data models for the queue and the table extraction results.

mod payload;
mod result;

pub use payload::{MessageStatus, QueueEnvelope, QueueMessage, QueuePayload};
pub use result::{ErrorCode, ExtractionOutcome, ResultPayload, ResultStatus};
