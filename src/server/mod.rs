//! HTTP API exposing the queue operations.
//!
//! Routes:
//! - `GET /health`
//! - `POST /v1/queue/{requests|results}` publish
//! - `POST /v1/queue/{requests|results}/lease`
//! - `POST /v1/queue/{requests|results}/ack`
//!
//! When a token is configured the queue routes require
//! `Authorization: Bearer <token>`.

mod handlers;
mod routes;

pub use handlers::{ApiError, DEFAULT_LEASE_LIMIT, MAX_LEASE_LIMIT};
pub use routes::create_router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::config::Settings;
use crate::queue::QueueStore;
use crate::worker::{WorkerScheduler, WorkerStats};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: QueueStore,
    pub settings: Arc<Settings>,
    /// Present when the worker runs in this process.
    pub worker_stats: Option<Arc<WorkerStats>>,
}

impl AppState {
    pub fn new(store: QueueStore, settings: Settings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            worker_stats: None,
        }
    }

    pub fn with_worker_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.worker_stats = Some(stats);
        self
    }
}

/// Serve the API until a shutdown signal arrives.
///
/// If `worker` is given it runs alongside the server and is stopped (its
/// in-flight batch drained) after the server has shut down.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    worker: Option<WorkerScheduler>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server at http://{}", addr);
    serve_until(listener, state, worker, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves or the worker exits.
///
/// A worker that ends on a store fault takes the server down with it and
/// the fault is returned.
pub async fn serve_until<F>(
    listener: TcpListener,
    state: AppState,
    worker: Option<WorkerScheduler>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let worker = worker.map(WorkerScheduler::spawn);
    let (state, worker_exit) = match &worker {
        Some(handle) => (state.with_worker_stats(handle.stats()), Some(handle.exited())),
        None => (state, None),
    };

    let stop = async move {
        match worker_exit {
            Some(exit) => tokio::select! {
                _ = shutdown => {}
                _ = exit => tracing::error!("Worker exited, shutting down server"),
            },
            None => shutdown.await,
        }
    };

    let served = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(stop)
        .await;

    if let Some(handle) = worker {
        tracing::info!("Stopping worker");
        handle.stop().await.context("Worker failed")?;
    }

    served?;
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
}
