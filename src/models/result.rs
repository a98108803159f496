//! Table extraction outcomes and the result messages built from them.

use serde::{Deserialize, Serialize};

use super::payload::QueuePayload;
use crate::utils::utc_now_iso;

/// Result envelope schema version.
pub const RESULT_VERSION: &str = "v1";

/// Result message type tag.
pub const RESULT_TYPE: &str = "tables.extract.result";

/// Overall status of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    NoTables,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoTables => "no_tables",
            Self::Failed => "failed",
        }
    }
}

/// Enumerated failure reasons reported in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    FileNotFound,
    DependencyMissing,
    FileAccessDenied,
    ParseError,
    WorkerException,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file_not_found",
            Self::DependencyMissing => "dependency_missing",
            Self::FileAccessDenied => "file_access_denied",
            Self::ParseError => "parse_error",
            Self::WorkerException => "worker_exception",
            Self::Unknown => "unknown",
        }
    }
}

/// What a processor reports for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub status: ResultStatus,
    pub error_code: Option<ErrorCode>,
    pub error: Option<String>,
    pub table_count: Option<u64>,
    pub tables_location: Option<String>,
    pub engine: String,
}

impl ExtractionOutcome {
    /// Successful extraction; `no_tables` when nothing was found.
    pub fn extracted(engine: &str, table_count: u64, tables_location: String) -> Self {
        Self {
            status: if table_count > 0 {
                ResultStatus::Ok
            } else {
                ResultStatus::NoTables
            },
            error_code: None,
            error: None,
            table_count: Some(table_count),
            tables_location: Some(tables_location),
            engine: engine.to_string(),
        }
    }

    /// Failed extraction with an enumerated reason.
    pub fn failed(engine: &str, code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            error_code: Some(code),
            error: Some(error.into()),
            table_count: Some(0),
            tables_location: None,
            engine: engine.to_string(),
        }
    }
}

/// Message published to the `results` queue for every processed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub job_id: String,
    pub doc_id: String,
    pub status: ResultStatus,
    pub tables_location: Option<String>,
    pub table_count: Option<u64>,
    pub engine: String,
    pub error_code: Option<ErrorCode>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub finished_at: String,
}

impl ResultPayload {
    /// Build the result for `request` from a processor outcome.
    pub fn from_outcome(request: &QueuePayload, outcome: ExtractionOutcome, duration_ms: u64) -> Self {
        Self {
            version: RESULT_VERSION.to_string(),
            kind: RESULT_TYPE.to_string(),
            job_id: request.job_id_or_unknown().to_string(),
            doc_id: request.doc_id_or_unknown().to_string(),
            status: outcome.status,
            tables_location: outcome.tables_location,
            table_count: outcome.table_count,
            engine: outcome.engine,
            error_code: outcome.error_code,
            error: outcome.error,
            duration_ms,
            finished_at: utc_now_iso(),
        }
    }

    /// Result for a request whose processing raised instead of reporting.
    pub fn worker_exception(
        request: &QueuePayload,
        engine: &str,
        detail: &str,
        duration_ms: u64,
    ) -> Self {
        let outcome = ExtractionOutcome {
            table_count: None,
            ..ExtractionOutcome::failed(
                engine,
                ErrorCode::WorkerException,
                format!("worker_exception: {}", detail),
            )
        };
        Self::from_outcome(request, outcome, duration_ms)
    }

    /// Convert into a generic queue payload for publishing.
    pub fn to_queue_payload(&self) -> serde_json::Result<QueuePayload> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }

    /// Decode a result leased from the `results` queue.
    pub fn from_queue_payload(payload: &QueuePayload) -> serde_json::Result<Self> {
        serde_json::to_value(payload).and_then(serde_json::from_value)
    }
}
