//! Results command.

use tablequeue::config::Settings;
use tablequeue::queue::RESULTS_QUEUE;

use super::open_store;
use crate::cli::icons;

/// Lease up to `limit` results and print them as JSON lines.
///
/// Without `ack` the results stay leased and reappear once the lease lapses.
pub async fn cmd_results(settings: &Settings, limit: usize, ack: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let envelopes = store
        .lease(RESULTS_QUEUE, limit, settings.worker.lease_seconds)
        .await?;

    if envelopes.is_empty() {
        eprintln!("{} No results available", icons::info());
        return Ok(());
    }

    for envelope in &envelopes {
        println!("{}", serde_json::to_string(envelope)?);
    }

    if ack {
        let ids = envelopes
            .into_iter()
            .map(|envelope| envelope.queue_message_id)
            .collect();
        let acked = store.ack(RESULTS_QUEUE, ids).await?;
        eprintln!("{} Acknowledged {} result(s)", icons::success(), acked);
    }

    Ok(())
}
