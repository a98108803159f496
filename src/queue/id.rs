//! Message id derivation.

use sha2::{Digest, Sha256};

use crate::models::QueuePayload;

/// Length of a message id in hex characters.
pub const MESSAGE_ID_LEN: usize = 24;

/// Derive a message id from the payload's identifying fields.
///
/// The digest covers `jobId|docId|timestamp|sequence`. The timestamp and the
/// store's publish sequence make ids unique per publish; identical payloads
/// published twice get different ids. This is not a deduplication key.
pub fn message_id(payload: &QueuePayload, timestamp: &str, sequence: u64) -> String {
    let material = format!(
        "{}|{}|{}|{}",
        payload.job_id.as_deref().unwrap_or(""),
        payload.doc_id.as_deref().unwrap_or(""),
        timestamp,
        sequence
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(MESSAGE_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shape() {
        let payload = QueuePayload::request(Some("job".into()), "doc", "/a.pdf");
        let id = message_id(&payload, "2024-01-01T00:00:00.000000Z", 0);
        assert_eq!(id.len(), MESSAGE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_id_is_deterministic_for_same_inputs() {
        let payload = QueuePayload::request(Some("job".into()), "doc", "/a.pdf");
        let ts = "2024-01-01T00:00:00.000000Z";
        assert_eq!(message_id(&payload, ts, 3), message_id(&payload, ts, 3));
    }

    #[test]
    fn test_identical_payloads_get_distinct_ids() {
        let payload = QueuePayload::request(Some("job".into()), "doc", "/a.pdf");
        let ts = "2024-01-01T00:00:00.000000Z";
        assert_ne!(message_id(&payload, ts, 0), message_id(&payload, ts, 1));
        assert_ne!(
            message_id(&payload, ts, 0),
            message_id(&payload, "2024-01-01T00:00:00.000001Z", 0)
        );
    }

    #[test]
    fn test_path_does_not_affect_id() {
        let a = QueuePayload::request(Some("job".into()), "doc", "/a.pdf");
        let b = QueuePayload::request(Some("job".into()), "doc", "/b.pdf");
        let ts = "2024-01-01T00:00:00.000000Z";
        assert_eq!(message_id(&a, ts, 0), message_id(&b, ts, 0));
    }
}
