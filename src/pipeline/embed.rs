//! Embed stage: `embedder_workers` tasks sharing one receiver.
//!
//! Workers race for records off the same `Arc<Mutex<Receiver>>` rather
//! than each owning a dedicated queue — this is the simplest way to get
//! fan-out without a custom work-stealing structure, and it means
//! adding a worker is just spawning another task against the same
//! handle. The last worker to see its receiver return `None` drops its
//! clone of `store_tx`; once every worker has done that, the store
//! stage's receiver naturally ends, no explicit coordination needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::adapters::Embedder;
use crate::cancellation::CancellationToken;
use crate::error::EmbedderError;
use crate::metrics::{self, StageTimer, STAGE_EMBED};
use crate::record::{EmbedOutcome, Record};

pub async fn run(
    worker_id: usize,
    embedder: Arc<dyn Embedder>,
    embed_rx: Arc<Mutex<mpsc::Receiver<Record>>>,
    store_tx: mpsc::Sender<Record>,
    token: CancellationToken,
    embed_timeout: Duration,
    skip_embedder_errors: bool,
    live_workers: Arc<AtomicUsize>,
) {
    live_workers.fetch_add(1, Ordering::SeqCst);
    metrics::set_embed_workers_live(live_workers.load(Ordering::SeqCst) as i64);

    loop {
        // No explicit cancellation check here: cancellation propagates
        // by the fetch stage closing `embed_queue`, so a worker just
        // keeps draining whatever was already buffered and returns once
        // `recv` reports the channel closed and empty — the "drain"
        // behavior the supervisor's shutdown sequence relies on.
        let next = {
            let mut rx = embed_rx.lock().await;
            rx.recv().await
        };

        let mut record = match next {
            Some(record) => record,
            None => break,
        };

        let timer = StageTimer::new(STAGE_EMBED);
        let outcome = match tokio::time::timeout(embed_timeout, embedder.embed(&token, &record.text))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EmbedderError::Timeout),
        };
        drop(timer);

        // A per-record embed error is never fatal to the pipeline: it is
        // attached to the record and the record still flows to the
        // store stage, which filters to storable records when it
        // flushes. `skip_embedder_errors` only changes how loudly this
        // is logged; a failed record is never stored or acknowledged
        // either way and is left for the source to redeliver.
        match outcome {
            Ok(vector) => {
                record.embed_outcome = EmbedOutcome::Embedded(vector);
                metrics::record_processed(STAGE_EMBED, 1);
            }
            Err(e) => {
                metrics::record_error(STAGE_EMBED, "embed");
                metrics::record_dropped(STAGE_EMBED, "embed_failed");
                if skip_embedder_errors {
                    warn!(worker = worker_id, error = %e, "embedding failed, skipping record");
                } else {
                    error!(worker = worker_id, error = %e, "embedding failed");
                }
                record.embed_outcome = EmbedOutcome::Failed(e.to_string());
            }
        }

        if store_tx.send(record).await.is_err() {
            break;
        }
    }

    live_workers.fetch_sub(1, Ordering::SeqCst);
    metrics::set_embed_workers_live(live_workers.load(Ordering::SeqCst) as i64);
}
