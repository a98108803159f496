//! Per-batch dispatch and per-request processing units.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedSemaphorePermit;
use tokio::task::{JoinError, JoinSet};

use super::{WorkerScheduler, WorkerStats};
use crate::models::{QueueEnvelope, ResultPayload, ResultStatus};
use crate::processor::Processor;
use crate::queue::{QueueError, QueueStore, Result, REQUESTS_QUEUE, RESULTS_QUEUE};

/// Everything a unit needs, shared across the batch.
struct UnitContext {
    store: QueueStore,
    processor: Arc<dyn Processor>,
    stats: Arc<WorkerStats>,
    processing_timeout: Duration,
}

impl WorkerScheduler {
    /// Run every message of `batch` through the gate and wait for all of them.
    ///
    /// Returns the first store fault after the whole batch has finished.
    pub(super) async fn dispatch_batch(&self, batch: Vec<QueueEnvelope>) -> Result<()> {
        let ctx = Arc::new(UnitContext {
            store: self.store.clone(),
            processor: self.processor.clone(),
            stats: self.stats.clone(),
            processing_timeout: self.config.processing_timeout,
        });

        let mut units = JoinSet::new();
        for envelope in batch {
            // The gate is never closed.
            let Ok(permit) = self.gate.clone().acquire_owned().await else {
                break;
            };
            let ctx = ctx.clone();
            units.spawn(async move { process_unit(&ctx, envelope, permit).await });
        }

        let mut first_error: Option<QueueError> = None;
        while let Some(joined) = units.join_next().await {
            let outcome = joined.map_err(QueueError::from).and_then(|r| r);
            if let Err(e) = outcome {
                tracing::error!("Request unit failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Process one request: extract, publish the result, then ack the request.
///
/// The permit travels with the processor invocation and is released only
/// when the processor returns. A unit that times out reports the request as
/// failed without waiting, but its slot stays taken until the abandoned
/// invocation actually finishes.
async fn process_unit(
    ctx: &UnitContext,
    envelope: QueueEnvelope,
    permit: OwnedSemaphorePermit,
) -> Result<()> {
    let started = Instant::now();
    let QueueEnvelope {
        queue_message_id,
        payload: request,
    } = envelope;

    let doc_id = request.doc_id_or_unknown().to_string();
    let path = PathBuf::from(request.raw_pdf_path.clone().unwrap_or_default());
    let engine = ctx.processor.engine().to_string();

    let processor = ctx.processor.clone();
    // Requests without a docId still need their own output file.
    let unit_doc_id = request
        .doc_id
        .clone()
        .unwrap_or_else(|| format!("unknown-{}", queue_message_id));
    let mut invocation = tokio::spawn(async move {
        let _permit = permit;
        processor.extract(&unit_doc_id, &path).await
    });

    let result = match tokio::time::timeout(ctx.processing_timeout, &mut invocation).await {
        Ok(Ok(Ok(outcome))) => {
            ResultPayload::from_outcome(&request, outcome, elapsed_ms(started))
        }
        Ok(Ok(Err(e))) => ResultPayload::worker_exception(
            &request,
            &engine,
            &format!("{:#}", e),
            elapsed_ms(started),
        ),
        Ok(Err(join_error)) => ResultPayload::worker_exception(
            &request,
            &engine,
            &join_error_detail(join_error),
            elapsed_ms(started),
        ),
        Err(_) => {
            tracing::warn!(
                "Processor still running for request {} after {:?}; slot held until it returns",
                queue_message_id,
                ctx.processing_timeout
            );
            ResultPayload::worker_exception(
                &request,
                &engine,
                &format!(
                    "processing exceeded {}s",
                    ctx.processing_timeout.as_secs_f64()
                ),
                elapsed_ms(started),
            )
        }
    };

    let failed = result.status == ResultStatus::Failed;
    if failed {
        tracing::warn!(
            "Request {} (doc {}) failed: {}",
            queue_message_id,
            doc_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    } else {
        tracing::debug!(
            "Request {} (doc {}) finished: {} ({} ms)",
            queue_message_id,
            doc_id,
            result.status.as_str(),
            result.duration_ms
        );
    }

    ctx.store
        .publish(RESULTS_QUEUE, vec![result.to_queue_payload()?])
        .await?;
    ctx.store
        .ack(REQUESTS_QUEUE, vec![queue_message_id])
        .await?;

    ctx.stats.record_unit(failed);
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Describe why a processor task ended without returning.
fn join_error_detail(error: JoinError) -> String {
    if error.is_cancelled() {
        return "processing task cancelled".to_string();
    }
    panic_message(error.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "processor panicked".to_string()
    }
}
