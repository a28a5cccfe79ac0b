//! Store stage: the only task that calls `Storage::store` and the only
//! task (besides fetch) that touches the source, via
//! `Source::after_process_hook`.
//!
//! Buffers embedded records until `storage_batch_size` is reached, on
//! cancellation (within a bounded grace window), or once the embed
//! stage has closed the queue and there is nothing left to drain.
//! Acknowledgement only happens after a successful store, which is what
//! makes the pipeline at-least-once rather than at-most-once: a crash
//! between store and ack means the source redelivers, and storage's
//! upsert-by-id makes that redelivery idempotent.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::adapters::{Source, Storage};
use crate::cancellation::CancellationToken;
use crate::error::PipelineError;
use crate::metrics::{self, StageTimer, STAGE_STORE};
use crate::record::Record;
use std::sync::Arc;

pub async fn run(
    storage: Arc<Mutex<Box<dyn Storage>>>,
    source: Arc<Mutex<Box<dyn Source>>>,
    mut store_rx: mpsc::Receiver<Record>,
    token: CancellationToken,
    batch_size: usize,
    store_timeout: Duration,
    ack_timeout: Duration,
    shutdown_grace: Duration,
    error_tx: mpsc::Sender<PipelineError>,
) {
    let mut pending: Vec<Record> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                drain_with_grace(&mut store_rx, &mut pending, batch_size, shutdown_grace, &storage, &source, &token, store_timeout, ack_timeout, &error_tx).await;
                break;
            }

            maybe_record = store_rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        pending.push(record);
                        if pending.len() >= batch_size {
                            flush(&storage, &source, &mut pending, &token, store_timeout, ack_timeout, &error_tx).await;
                        }
                    }
                    None => {
                        flush(&storage, &source, &mut pending, &token, store_timeout, ack_timeout, &error_tx).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Once cancellation fires, keep draining whatever is already in
/// flight for up to `shutdown_grace` rather than discarding it — that
/// window is what lets a batch that's almost full finish instead of
/// being redelivered from scratch on restart.
async fn drain_with_grace(
    store_rx: &mut mpsc::Receiver<Record>,
    pending: &mut Vec<Record>,
    batch_size: usize,
    shutdown_grace: Duration,
    storage: &Arc<Mutex<Box<dyn Storage>>>,
    source: &Arc<Mutex<Box<dyn Source>>>,
    token: &CancellationToken,
    store_timeout: Duration,
    ack_timeout: Duration,
    error_tx: &mpsc::Sender<PipelineError>,
) {
    let deadline = tokio::time::sleep(shutdown_grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            maybe_record = store_rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        pending.push(record);
                        if pending.len() >= batch_size {
                            flush(storage, source, pending, token, store_timeout, ack_timeout, error_tx).await;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    flush(storage, source, pending, token, store_timeout, ack_timeout, error_tx).await;
}

async fn flush(
    storage: &Arc<Mutex<Box<dyn Storage>>>,
    source: &Arc<Mutex<Box<dyn Source>>>,
    pending: &mut Vec<Record>,
    token: &CancellationToken,
    store_timeout: Duration,
    ack_timeout: Duration,
    error_tx: &mpsc::Sender<PipelineError>,
) {
    if pending.is_empty() {
        return;
    }

    let batch = std::mem::take(pending);
    let storable: Vec<Record> = batch.iter().filter(|r| r.is_storable()).cloned().collect();
    if storable.is_empty() {
        return;
    }

    let timer = StageTimer::new(STAGE_STORE);
    let store_result = {
        let mut storage = storage.lock().await;
        match tokio::time::timeout(store_timeout, storage.store(token, &storable)).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::StorageError::Timeout),
        }
    };
    drop(timer);

    match store_result {
        Ok(()) => {
            metrics::record_processed(STAGE_STORE, storable.len() as u64);
            let mut source = source.lock().await;
            let ack_result =
                tokio::time::timeout(ack_timeout, source.after_process_hook(&storable)).await;
            let ack_result = match ack_result {
                Ok(result) => result,
                Err(_) => Err(crate::error::SourceError::Timeout),
            };
            if let Err(e) = ack_result {
                error!(error = %e, "acknowledgement failed after a successful store");
                metrics::record_error(STAGE_STORE, "ack");
                let _ = error_tx.try_send(PipelineError::Source(e));
            }
        }
        Err(e) => {
            warn!(error = %e, "storage failed, this batch will be redelivered");
            metrics::record_error(STAGE_STORE, "store");
            // A storage error must not clear `pending`: the batch stays
            // held so a race between this error and the error-triggered
            // cancellation being observed doesn't silently let fresh
            // records batch in behind a failed, unacknowledged one.
            *pending = batch;
            let _ = error_tx.try_send(PipelineError::Storage(e));
        }
    }
}
