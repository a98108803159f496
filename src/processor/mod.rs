//! Document processors that turn a request into an extraction outcome.
//!
//! The worker treats a processor as a black box: it passes a document id and
//! a source path and expects a structured [`ExtractionOutcome`] back. Expected
//! failures (missing file, missing tool, unreadable PDF) must be reported in
//! the outcome. An `Err` or a panic is treated by the worker as an unexpected
//! exception and still produces a result message.

mod pdf_tables;

pub use pdf_tables::{detect_tables, PdfTableExtractor, ENGINE_PDFTOTEXT};

use std::path::Path;

use async_trait::async_trait;

use crate::models::ExtractionOutcome;

#[async_trait]
pub trait Processor: Send + Sync {
    /// Engine name recorded in results.
    fn engine(&self) -> &str;

    /// Verify external dependencies before the worker starts.
    fn check_available(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Extract tables for one document.
    ///
    /// The worker stops waiting after its processing timeout but keeps the
    /// concurrency slot until this returns, so implementations must bound
    /// their own external work.
    async fn extract(&self, doc_id: &str, path: &Path) -> anyhow::Result<ExtractionOutcome>;
}
