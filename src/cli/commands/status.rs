//! Status command.

use console::style;

use tablequeue::config::Settings;
use tablequeue::queue::{REQUESTS_QUEUE, RESULTS_QUEUE};

use super::open_store;

/// Print pending and leased counts for both queues.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    println!("\n{}", style("Queue Status").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Database:", store.location());

    for queue in [REQUESTS_QUEUE, RESULTS_QUEUE] {
        let depth = store.depth(queue).await?;
        println!(
            "{:<20} {} pending, {} leased",
            format!("{}:", queue),
            depth.pending,
            depth.leased
        );
    }

    Ok(())
}
