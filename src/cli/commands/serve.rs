//! Web server command.

use std::net::SocketAddr;

use tablequeue::config::Settings;
use tablequeue::server::{self, AppState};

use super::{open_store, prepare_worker};
use crate::cli::icons;

/// Port used when the bind address names only a host.
const DEFAULT_PORT: u16 = 8088;

/// Start the queue API, with the worker unless it is disabled.
pub async fn cmd_serve(settings: Settings) -> anyhow::Result<()> {
    let addr = resolve_bind_address(&settings.bind).await?;
    let store = open_store(&settings)?;
    println!("{} Queue database ready at {}", icons::success(), store.location());

    let worker = if settings.worker_enabled {
        let worker = prepare_worker(&settings, store.clone())?;
        println!(
            "{} Worker enabled (concurrency {}, batch {}, lease {}s)",
            icons::success(),
            settings.worker.concurrency,
            settings.worker.max_batch,
            settings.worker.lease_seconds
        );
        Some(worker)
    } else {
        println!("{} Worker disabled", icons::warn());
        None
    };

    if settings.token.is_none() {
        println!(
            "{} No token configured: the queue API is open to anyone who can reach it",
            icons::warn()
        );
    }

    println!("{} Starting tablequeue server at http://{}", icons::info(), addr);
    println!("  Press Ctrl+C to stop");

    server::serve(AppState::new(store, settings), addr, worker).await
}

/// Resolve a bind address into a socket address.
async fn resolve_bind_address(bind: &str) -> anyhow::Result<SocketAddr> {
    let (host, port) = parse_bind_address(bind);
    let resolved = tokio::net::lookup_host((host.as_str(), port)).await?.next();
    resolved.ok_or_else(|| anyhow::anyhow!("Could not resolve bind address: {}", bind))
}

/// Parse a bind address that can be:
/// - Just a port: "8088" -> 127.0.0.1:8088
/// - Just a host: "0.0.0.0" -> 0.0.0.0:8088
/// - Host and port: "0.0.0.0:8088" -> 0.0.0.0:8088
fn parse_bind_address(bind: &str) -> (String, u16) {
    if let Ok(port) = bind.parse::<u16>() {
        return ("127.0.0.1".to_string(), port);
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.to_string(), port);
        }
    }

    (bind.to_string(), DEFAULT_PORT)
}
