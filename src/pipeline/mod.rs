//! Supervisor: owns the three adapters and the lifecycle of a single
//! pipeline run.
//!
//! `run` drives validate -> connect -> spawn -> wait -> drain -> release
//! in order. "Wait" is implicit: fetch stops producing (end of stream,
//! cancellation, or a fatal error cancelling the shared token), which
//! closes the embed queue once fetch's sender drops, which closes the
//! store queue once every embed worker's sender drops in turn. The
//! supervisor just joins the three stages in that order — there is no
//! separate barrier to coordinate by hand.

pub mod embed;
pub mod fetch;
pub mod store;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::adapters::{Embedder, Source, Storage};
use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Validated,
    Connected,
    Running,
    Paused,
    Draining,
    Closed,
}

/// Owns the adapters for the lifetime of one `run`. A new `Supervisor`
/// is built per run; there is no restart-in-place.
pub struct Supervisor {
    config: Config,
    source: Arc<Mutex<Box<dyn Source>>>,
    embedder: Arc<dyn Embedder>,
    storage: Arc<Mutex<Box<dyn Storage>>>,
    state: Arc<RwLock<State>>,
    paused: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        source: Box<dyn Source>,
        embedder: Arc<dyn Embedder>,
        storage: Box<dyn Storage>,
    ) -> Self {
        Self {
            config,
            source: Arc::new(Mutex::new(source)),
            embedder,
            storage: Arc::new(Mutex::new(storage)),
            state: Arc::new(RwLock::new(State::Created)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn state(&self) -> State {
        *self.state.read().await
    }

    pub fn configuration(&self) -> &Config {
        &self.config
    }

    /// Stops the fetch stage from pulling new batches without tearing
    /// the pipeline down; already-fetched records still drain through
    /// embed and store.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        *self.state.write().await = State::Paused;
    }

    pub async fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        *self.state.write().await = State::Running;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        if let Err(e) = self.config.validate() {
            let err = PipelineError::Configuration(e.to_string());
            self.release().await;
            return Err(err);
        }
        *self.state.write().await = State::Validated;

        {
            let mut source = self.source.lock().await;
            if let Err(e) = source.connect().await {
                let err = PipelineError::Connection(e.to_string());
                drop(source);
                self.release().await;
                return Err(err);
            }
        }
        {
            let mut storage = self.storage.lock().await;
            if let Err(e) = storage.connect().await {
                let err = PipelineError::Connection(e.to_string());
                drop(storage);
                self.release().await;
                return Err(err);
            }
        }
        *self.state.write().await = State::Connected;
        info!("pipeline connected");

        let embed_queue_cap = self.config.source_batch_size.saturating_mul(2).max(1);
        let store_queue_cap = self.config.storage_batch_size.saturating_mul(2).max(1);
        metrics::set_queue_capacity(metrics::STAGE_EMBED, embed_queue_cap as i64);
        metrics::set_queue_capacity(metrics::STAGE_STORE, store_queue_cap as i64);

        let (embed_tx, embed_rx) = mpsc::channel(embed_queue_cap);
        let (store_tx, store_rx) = mpsc::channel(store_queue_cap);
        // Capacity 1: only the first fatal error matters, every stage
        // that hits one cancels the shared token instead of queuing more.
        let (error_tx, error_rx) = mpsc::channel::<PipelineError>(1);

        let embed_rx = Arc::new(Mutex::new(embed_rx));
        let live_workers = Arc::new(AtomicUsize::new(0));

        let error_watcher = {
            let watch_token = token.child_token();
            tokio::spawn(watch_token_for_error(watch_token, error_rx))
        };

        let fetch_handle = tokio::spawn(fetch::run(
            self.source.clone(),
            embed_tx,
            token.child_token(),
            self.paused.clone(),
            self.config.source_batch_size,
            self.config.fetch_timeout,
        ));

        let mut embed_handles = Vec::with_capacity(self.config.embedder_workers);
        for worker_id in 0..self.config.embedder_workers {
            embed_handles.push(tokio::spawn(embed::run(
                worker_id,
                self.embedder.clone(),
                embed_rx.clone(),
                store_tx.clone(),
                token.child_token(),
                self.config.embed_timeout,
                self.config.skip_embedder_errors,
                live_workers.clone(),
            )));
        }
        drop(store_tx);

        let store_handle = tokio::spawn(store::run(
            self.storage.clone(),
            self.source.clone(),
            store_rx,
            token.child_token(),
            self.config.storage_batch_size,
            self.config.store_timeout,
            self.config.fetch_timeout,
            self.config.shutdown_grace,
            error_tx.clone(),
        ));
        drop(error_tx);

        *self.state.write().await = State::Running;
        metrics::set_pipeline_running(true);
        info!(
            embedder_workers = self.config.embedder_workers,
            "pipeline running"
        );

        let draining_watch = {
            let state = self.state.clone();
            let token = token.child_token();
            tokio::spawn(async move {
                token.cancelled().await;
                *state.write().await = State::Draining;
            })
        };

        // Drain: fetch ending drops its embed_tx, which ends every embed
        // worker in turn, which drops their store_tx clones, which ends
        // the store stage. Joining in this order is the whole algorithm.
        let _ = fetch_handle.await;
        join_all(embed_handles).await;
        let _ = store_handle.await;
        let fatal_error = error_watcher.await.ok().flatten();
        let _ = draining_watch.await;

        metrics::set_pipeline_running(false);
        self.release().await;

        match fatal_error {
            Some(err) => Err(err),
            None if token.is_cancelled() => Err(PipelineError::Cancelled),
            None => Ok(()),
        }
    }

    /// Always closes the source and storage connections and transitions
    /// to `Closed`, whether `run` is unwinding from a validate/connect
    /// failure or from a normal drain. Safe to call even when one or both
    /// adapters never connected: both reference `close()` impls are
    /// no-ops on an unconnected adapter.
    async fn release(&self) {
        let mut source = self.source.lock().await;
        let mut storage = self.storage.lock().await;
        let (source_close, storage_close) = tokio::join!(source.close(), storage.close());
        if let Err(e) = source_close {
            warn!(error = %e, "error closing source during shutdown");
        }
        if let Err(e) = storage_close {
            warn!(error = %e, "error closing storage during shutdown");
        }
        drop(source);
        drop(storage);
        *self.state.write().await = State::Closed;
        info!("pipeline closed");
    }
}

async fn watch_token_for_error(
    token: CancellationToken,
    mut error_rx: mpsc::Receiver<PipelineError>,
) -> Option<PipelineError> {
    let error = error_rx.recv().await;
    if error.is_some() {
        token.cancel();
    }
    error
}
