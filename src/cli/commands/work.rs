//! Standalone worker command.

use tokio::sync::watch;

use tablequeue::config::Settings;
use tablequeue::server::shutdown_signal;

use super::{open_store, prepare_worker};
use crate::cli::icons;

/// Run the worker loop until Ctrl-C, then drain the current batch.
pub async fn cmd_work(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let worker = prepare_worker(settings, store)?;

    println!(
        "{} Worker running on {} (concurrency {}, batch {}, lease {}s)",
        icons::info(),
        settings.queue_path.display(),
        settings.worker.concurrency,
        settings.worker.max_batch,
        settings.worker.lease_seconds
    );
    println!("  Press Ctrl+C to stop");

    let (stop_tx, stop_rx) = watch::channel(false);
    let run = worker.run(stop_rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = &result {
                eprintln!("{} Worker stopped: {}", icons::error(), e);
            }
            return result.map_err(Into::into);
        }
        _ = shutdown_signal() => {
            println!("{} Finishing in-flight requests...", icons::info());
            let _ = stop_tx.send(true);
        }
    }

    run.await?;

    let stats = worker.stats().snapshot();
    println!(
        "{} Worker stopped ({} processed, {} failed)",
        icons::success(),
        stats.processed,
        stats.failed
    );
    Ok(())
}
