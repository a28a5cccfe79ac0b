//! Fetch stage: the only task that calls `Source::fetch`.
//!
//! Polls while running, backs off to a fixed interval while paused, and
//! screens out records with empty text before they ever become part of
//! a `Record` — a malformed record there is no principled way to embed
//! or store, so it is dropped and logged rather than carried downstream
//! as a record nobody can act on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::adapters::Source;
use crate::cancellation::CancellationToken;
use crate::error::SourceError;
use crate::metrics::{self, STAGE_FETCH};
use crate::record::{FetchOutcome, Record};

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Idle pause after an empty batch or a transient fetch error, so a
/// source that is temporarily empty or unreachable doesn't spin the
/// task hot while it waits to be retried.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub async fn run(
    source: Arc<Mutex<Box<dyn Source>>>,
    embed_tx: mpsc::Sender<Record>,
    token: CancellationToken,
    paused: Arc<AtomicBool>,
    batch_size: usize,
    fetch_timeout: Duration,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        if paused.load(Ordering::Relaxed) {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => continue,
            }
        }

        let fetch_result = {
            let mut source = source.lock().await;
            match tokio::time::timeout(fetch_timeout, source.fetch(&token, batch_size)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout),
            }
        };

        let raw_batch = match fetch_result {
            Ok(FetchOutcome::EndOfStream) => {
                info!("source reached end of stream, fetch stage stopping");
                break;
            }
            Ok(FetchOutcome::Batch(batch)) => batch,
            Err(e) => {
                // Transient fetch errors are never fatal: log and keep
                // polling. A crashed or unreachable source just means
                // the next iteration's fetch fails too, which is its
                // own natural backoff at the poll's latency.
                warn!(error = %e, "fetch failed, retrying");
                metrics::record_error(STAGE_FETCH, "fetch");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => continue,
                }
            }
        };

        if raw_batch.is_empty() {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => continue,
            }
        }

        let mut records = Vec::with_capacity(raw_batch.len());
        for raw in raw_batch {
            if raw.text.trim().is_empty() {
                warn!(source_ref = ?raw.source_ref, "dropping record with empty text");
                metrics::record_dropped(STAGE_FETCH, "empty_text");
                continue;
            }
            records.push(Record::from_raw(raw));
        }

        if records.is_empty() {
            continue;
        }

        {
            let mut source = source.lock().await;
            let hook_result =
                tokio::time::timeout(fetch_timeout, source.before_process_hook(&records)).await;
            match hook_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "before_process_hook failed, continuing with fetched batch"),
                Err(_) => warn!("before_process_hook timed out, continuing with fetched batch"),
            }
        }

        metrics::record_processed(STAGE_FETCH, records.len() as u64);

        for record in records {
            tokio::select! {
                _ = token.cancelled() => return,
                send_result = embed_tx.send(record) => {
                    if send_result.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
