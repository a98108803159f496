//! Queue message payloads and envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a stored message.
///
/// There is no terminal "done" status: acknowledging a message deletes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Available for leasing.
    Pending,
    /// Claimed by a consumer until its lease expires.
    Leased,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            _ => None,
        }
    }
}

/// Wire names of the typed payload fields.
pub const TYPED_FIELDS: [&str; 3] = ["jobId", "docId", "rawPdfPath"];

/// Application payload carried by a queue message.
///
/// The fields a table extraction request is known to carry are typed; any
/// other field lands in `extra` so producers can add data without a schema
/// change. Serialized as a single flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuePayload {
    #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(rename = "docId", default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(rename = "rawPdfPath", default, skip_serializing_if = "Option::is_none")]
    pub raw_pdf_path: Option<String>,
    /// Open extension data.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueuePayload {
    /// Build a table extraction request.
    pub fn request(job_id: Option<String>, doc_id: &str, raw_pdf_path: &str) -> Self {
        Self {
            job_id,
            doc_id: Some(doc_id.to_string()),
            raw_pdf_path: Some(raw_pdf_path.to_string()),
            extra: Map::new(),
        }
    }

    /// Attach an extension field.
    ///
    /// A key naming a typed field sets that field instead. A non-string
    /// value under such a key stays in `extra`, where `publish` rejects it.
    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        let typed = match key {
            "jobId" => Some(&mut self.job_id),
            "docId" => Some(&mut self.doc_id),
            "rawPdfPath" => Some(&mut self.raw_pdf_path),
            _ => None,
        };
        match (typed, value) {
            (Some(field), Value::String(s)) => *field = Some(s),
            (Some(field), Value::Null) => *field = None,
            (_, value) => {
                self.extra.insert(key.to_string(), value);
            }
        }
        self
    }

    /// First extension key that collides with a typed field, if any.
    ///
    /// Such a payload would serialize with a duplicate key and could not be
    /// read back.
    pub fn shadowed_field(&self) -> Option<&'static str> {
        TYPED_FIELDS
            .iter()
            .copied()
            .find(|field| self.extra.contains_key(*field))
    }

    /// Document identifier, or `"unknown"` when the producer omitted it.
    pub fn doc_id_or_unknown(&self) -> &str {
        self.doc_id.as_deref().unwrap_or("unknown")
    }

    /// Job identifier, or `"unknown"` when the producer omitted it.
    pub fn job_id_or_unknown(&self) -> &str {
        self.job_id.as_deref().unwrap_or("unknown")
    }
}

/// A leased message as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    #[serde(rename = "queueMessageId")]
    pub queue_message_id: String,
    pub payload: QueuePayload,
}

/// Full view of a stored message row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub id: String,
    pub payload: QueuePayload,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Set only while the message is leased.
    pub lease_until: Option<DateTime<Utc>>,
}
