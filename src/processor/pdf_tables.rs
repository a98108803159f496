//! Table extraction from PDFs using pdftotext's layout mode.
//!
//! `pdftotext -layout` keeps the horizontal alignment of the page, so table
//! cells end up separated by runs of spaces. A page is scanned line by line;
//! consecutive lines that split into the same number (at least two) of cells
//! form a table.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use super::Processor;
use crate::models::{ErrorCode, ExtractionOutcome, ResultStatus};
use crate::utils::{sanitize_filename, utc_now_iso};

/// Engine name recorded in results.
pub const ENGINE_PDFTOTEXT: &str = "pdftotext";

/// Minimum aligned lines for a block to count as a table.
const MIN_TABLE_ROWS: usize = 2;

/// Minimum cells per line for a line to count as a table row.
const MIN_TABLE_COLUMNS: usize = 2;

/// Cells are separated by two or more whitespace characters.
static CELL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

/// A table as rows of cell strings.
pub type Table = Vec<Vec<String>>;

/// Built-in processor backed by poppler's `pdftotext`.
#[derive(Debug, Clone)]
pub struct PdfTableExtractor {
    output_dir: PathBuf,
    tool: PathBuf,
    /// Bound on one pdftotext run; the child is killed when it expires.
    timeout: Option<Duration>,
}

impl PdfTableExtractor {
    /// Create an extractor writing `<doc_id>.tables.json` files to `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            tool: PathBuf::from("pdftotext"),
            timeout: None,
        }
    }

    /// Use a specific `pdftotext` binary (name on PATH or explicit path).
    pub fn with_tool(mut self, tool: impl Into<PathBuf>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Kill pdftotext runs that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where the tables for `doc_id` are written.
    ///
    /// Ids that are not already safe file names get a digest suffix, so two
    /// ids that sanitize alike (`a/b` and `a_b`) never share a file.
    pub fn output_path(&self, doc_id: &str) -> PathBuf {
        let stem = sanitize_filename(doc_id);
        let name = if stem == doc_id {
            stem
        } else {
            let digest = hex::encode(Sha256::digest(doc_id.as_bytes()));
            format!("{}-{}", stem, &digest[..8])
        };
        self.output_dir.join(format!("{}.tables.json", name))
    }

    /// Run pdftotext in layout mode and capture the text.
    async fn run_pdftotext(&self, tool: &Path, path: &Path) -> Result<String, ExtractionOutcome> {
        let mut command = Command::new(tool);
        command
            .args(["-layout", "-enc", "UTF-8"])
            .arg(path)
            .arg("-")
            .kill_on_drop(true);

        let output = command.output();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ExtractionOutcome::failed(
                        ENGINE_PDFTOTEXT,
                        ErrorCode::ParseError,
                        format!("pdftotext timed out after {}s", limit.as_secs_f64()),
                    ))
                }
            },
            None => output.await,
        };

        match result {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ExtractionOutcome::failed(
                    ENGINE_PDFTOTEXT,
                    ErrorCode::ParseError,
                    format!("pdftotext failed: {}", stderr.trim()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ExtractionOutcome::failed(
                ENGINE_PDFTOTEXT,
                ErrorCode::DependencyMissing,
                "pdftotext_not_installed",
            )),
            Err(e) => Err(io_failure(&e)),
        }
    }

    /// Detect tables in pdftotext output and write the tables document.
    fn tabulate(&self, doc_id: &str, path: &Path, text: &str) -> ExtractionOutcome {
        let pages: Vec<PageTables> = split_pages(text)
            .into_iter()
            .enumerate()
            .map(|(i, page)| PageTables::new(i + 1, detect_tables(page)))
            .collect();
        let table_count: u64 = pages.iter().map(|p| p.table_count as u64).sum();

        let document = TablesDocument {
            doc_id: doc_id.to_string(),
            status: if table_count > 0 {
                ResultStatus::Ok
            } else {
                ResultStatus::NoTables
            },
            table_count,
            page_count: pages.len(),
            pages,
            engine: ENGINE_PDFTOTEXT,
            extracted_at: utc_now_iso(),
        };

        let output_path = self.output_path(doc_id);
        if let Err(e) = write_document(&output_path, &document) {
            return io_failure(&e);
        }

        tracing::debug!(
            "Extracted {} table(s) from {} into {}",
            table_count,
            path.display(),
            output_path.display()
        );
        ExtractionOutcome::extracted(
            ENGINE_PDFTOTEXT,
            table_count,
            output_path.display().to_string(),
        )
    }
}

#[async_trait]
impl Processor for PdfTableExtractor {
    fn engine(&self) -> &str {
        ENGINE_PDFTOTEXT
    }

    fn check_available(&self) -> anyhow::Result<()> {
        which::which(&self.tool).map(|_| ()).map_err(|_| {
            anyhow::anyhow!(
                "{} is required for the table worker. Install poppler-utils.",
                self.tool.display()
            )
        })
    }

    async fn extract(&self, doc_id: &str, path: &Path) -> anyhow::Result<ExtractionOutcome> {
        if path.as_os_str().is_empty() || !path.exists() {
            return Ok(ExtractionOutcome::failed(
                ENGINE_PDFTOTEXT,
                ErrorCode::FileNotFound,
                format!("raw pdf not found: {}", path.display()),
            ));
        }

        let Ok(tool) = which::which(&self.tool) else {
            return Ok(ExtractionOutcome::failed(
                ENGINE_PDFTOTEXT,
                ErrorCode::DependencyMissing,
                "pdftotext_not_installed",
            ));
        };

        if let Err(e) = std::fs::File::open(path) {
            return Ok(io_failure(&e));
        }

        let text = match self.run_pdftotext(&tool, path).await {
            Ok(text) => text,
            Err(outcome) => return Ok(outcome),
        };

        let extractor = self.clone();
        let doc_id = doc_id.to_string();
        let path = path.to_path_buf();
        let outcome =
            tokio::task::spawn_blocking(move || extractor.tabulate(&doc_id, &path, &text))
                .await?;
        Ok(outcome)
    }
}

/// Map an IO error to a failed outcome.
fn io_failure(e: &io::Error) -> ExtractionOutcome {
    let code = if e.kind() == io::ErrorKind::PermissionDenied {
        ErrorCode::FileAccessDenied
    } else {
        ErrorCode::ParseError
    };
    ExtractionOutcome::failed(ENGINE_PDFTOTEXT, code, e.to_string())
}

/// Split pdftotext output into pages on form feeds.
fn split_pages(text: &str) -> Vec<&str> {
    let mut pages: Vec<&str> = text.split('\x0c').collect();
    // pdftotext terminates every page, including the last, with a form feed.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

/// Find aligned tables in one page of layout text.
///
/// Identical tables on the same page are reported once.
pub fn detect_tables(page: &str) -> Vec<Table> {
    let mut tables: Vec<Table> = Vec::new();
    let mut seen: HashSet<Table> = HashSet::new();
    let mut current: Table = Vec::new();

    let mut flush = |current: &mut Table| {
        let block = std::mem::take(current);
        if block.len() >= MIN_TABLE_ROWS && seen.insert(block.clone()) {
            tables.push(block);
        }
    };

    for line in page.lines() {
        let cells: Vec<String> = CELL_SEPARATOR
            .split(line.trim())
            .filter(|cell| !cell.is_empty())
            .map(|cell| cell.to_string())
            .collect();

        if cells.len() < MIN_TABLE_COLUMNS {
            flush(&mut current);
            continue;
        }
        if current.first().is_some_and(|row| row.len() != cells.len()) {
            flush(&mut current);
        }
        current.push(cells);
    }
    flush(&mut current);

    tables
}

fn write_document(path: &Path, document: &TablesDocument) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(path, json)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TablesDocument {
    doc_id: String,
    status: ResultStatus,
    table_count: u64,
    page_count: usize,
    pages: Vec<PageTables>,
    engine: &'static str,
    extracted_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageTables {
    page_number: usize,
    table_count: usize,
    tables: Vec<TableEntry>,
}

impl PageTables {
    fn new(page_number: usize, tables: Vec<Table>) -> Self {
        Self {
            page_number,
            table_count: tables.len(),
            tables: tables
                .into_iter()
                .enumerate()
                .map(|(index, rows)| TableEntry {
                    index,
                    row_count: rows.len(),
                    rows,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    index: usize,
    row_count: usize,
    rows: Table,
}
