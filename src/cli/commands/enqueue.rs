//! Enqueue command.

use tablequeue::config::Settings;
use tablequeue::models::QueuePayload;
use tablequeue::queue::REQUESTS_QUEUE;

use super::open_store;
use crate::cli::icons;

/// Publish one table extraction request.
pub async fn cmd_enqueue(
    settings: &Settings,
    job_id: Option<String>,
    doc_id: &str,
    path: &str,
) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let request = QueuePayload::request(job_id, doc_id, path);
    store.publish(REQUESTS_QUEUE, vec![request]).await?;

    println!("{} Queued {} ({})", icons::success(), doc_id, path);
    Ok(())
}
