//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod enqueue;
mod results;
mod serve;
mod status;
mod work;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use tablequeue::config::{ServiceArgs, Settings};
use tablequeue::processor::{PdfTableExtractor, Processor};
use tablequeue::queue::QueueStore;
use tablequeue::worker::WorkerScheduler;

#[derive(Parser)]
#[command(name = "tablequeue")]
#[command(about = "Lease-based work queue and PDF table extraction worker")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the queue API (and the worker unless disabled)
    Serve,

    /// Run the worker without the HTTP API
    Work,

    /// Publish one table extraction request
    Enqueue {
        /// Document identifier
        #[arg(long)]
        doc_id: String,
        /// Path to the source PDF
        #[arg(long)]
        path: String,
        /// Job identifier
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Lease results and print them as JSON lines
    Results {
        /// Maximum results to lease
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Acknowledge the printed results
        #[arg(long)]
        ack: bool,
    },

    /// Show queue depths
    Status,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from(cli.service);

    match cli.command {
        Commands::Serve => serve::cmd_serve(settings).await,
        Commands::Work => work::cmd_work(&settings).await,
        Commands::Enqueue {
            doc_id,
            path,
            job_id,
        } => enqueue::cmd_enqueue(&settings, job_id, &doc_id, &path).await,
        Commands::Results { limit, ack } => results::cmd_results(&settings, limit, ack).await,
        Commands::Status => status::cmd_status(&settings).await,
    }
}

/// Open the queue database named in the settings.
fn open_store(settings: &Settings) -> anyhow::Result<QueueStore> {
    QueueStore::open(&settings.queue_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to open queue database {}: {}",
            settings.queue_path.display(),
            e
        )
    })
}

/// Build the worker, checking that extraction can actually run.
fn prepare_worker(settings: &Settings, store: QueueStore) -> anyhow::Result<WorkerScheduler> {
    std::fs::create_dir_all(&settings.output_dir)?;

    let processor = PdfTableExtractor::new(&settings.output_dir)
        .with_timeout(settings.worker.processing_timeout);
    processor.check_available()?;

    Ok(WorkerScheduler::new(
        store,
        Arc::new(processor),
        settings.worker.clone(),
    ))
}
