//! Integration tests for the fetch -> embed -> store pipeline.
//!
//! Exercises the supervisor end to end against in-memory `Source`,
//! `Embedder`, and `Storage` doubles rather than real NATS/Redis/Qdrant
//! connections — the scenarios below are the ones the acknowledgement
//! and failure-isolation invariants actually hinge on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vectrain_pipeline::adapters::{Embedder, Source, Storage};
use vectrain_pipeline::cancellation::CancellationToken;
use vectrain_pipeline::config::{
    Config, EmbedderVariant, HttpEmbedderConfig, QdrantStorageConfig, RedisStreamsSourceConfig,
    SourceVariant, StorageVariant,
};
use vectrain_pipeline::error::{EmbedderError, SourceError, StorageError};
use vectrain_pipeline::record::{FetchOutcome, RawRecord, Record, SourceRef};
use vectrain_pipeline::Supervisor;

fn test_config(
    source_batch_size: usize,
    embedder_workers: usize,
    storage_batch_size: usize,
    skip_embedder_errors: bool,
) -> Config {
    Config {
        source: SourceVariant::RedisStreams(RedisStreamsSourceConfig {
            url: "redis://test".to_string(),
            stream: "test".to_string(),
        }),
        embedder: EmbedderVariant::Http(HttpEmbedderConfig {
            base_url: "http://test".to_string(),
            model: "test-model".to_string(),
            dimension: 4,
        }),
        storage: StorageVariant::Qdrant(QdrantStorageConfig {
            url: "http://test".to_string(),
            collection: "test".to_string(),
            vector_size: 4,
            distance: "Cosine".to_string(),
            payload_fields: vec![],
        }),
        source_batch_size,
        embedder_workers,
        storage_batch_size,
        fetch_timeout: Duration::from_secs(1),
        embed_timeout: Duration::from_secs(1),
        store_timeout: Duration::from_secs(1),
        skip_embedder_errors,
        shutdown_grace: Duration::from_millis(300),
        metrics_port: 0,
        metrics_enabled: false,
        control_port: 0,
    }
}

fn raw(id: &str, text: &str) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        source_ref: SourceRef::from_str(id),
        text: text.to_string(),
        payload: Default::default(),
    }
}

struct InMemorySource {
    remaining: Mutex<VecDeque<RawRecord>>,
    acked: Arc<Mutex<Vec<String>>>,
    fetch_delay: Duration,
}

impl InMemorySource {
    fn new(records: Vec<RawRecord>, acked: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            remaining: Mutex::new(records.into()),
            acked,
            fetch_delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn fetch(
        &mut self,
        _token: &CancellationToken,
        size: usize,
    ) -> Result<FetchOutcome, SourceError> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let mut remaining = self.remaining.lock().await;
        if remaining.is_empty() {
            return Ok(FetchOutcome::EndOfStream);
        }
        let mut batch = Vec::new();
        for _ in 0..size {
            match remaining.pop_front() {
                Some(r) => batch.push(r),
                None => break,
            }
        }
        Ok(FetchOutcome::Batch(batch))
    }

    async fn after_process_hook(&mut self, batch: &[Record]) -> Result<(), SourceError> {
        let mut acked = self.acked.lock().await;
        for record in batch {
            acked.push(record.id().to_string());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Fails `fetch` a fixed number of times before serving from `records`,
/// so a test can assert transient fetch errors don't abort the run.
struct FlakySource {
    remaining: Mutex<VecDeque<RawRecord>>,
    failures_left: Mutex<u32>,
    acked: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Source for FlakySource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn fetch(
        &mut self,
        _token: &CancellationToken,
        size: usize,
    ) -> Result<FetchOutcome, SourceError> {
        let mut failures_left = self.failures_left.lock().await;
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(SourceError::Fetch("upstream temporarily unreachable".to_string()));
        }
        drop(failures_left);

        let mut remaining = self.remaining.lock().await;
        if remaining.is_empty() {
            return Ok(FetchOutcome::EndOfStream);
        }
        let mut batch = Vec::new();
        for _ in 0..size {
            match remaining.pop_front() {
                Some(r) => batch.push(r),
                None => break,
            }
        }
        Ok(FetchOutcome::Batch(batch))
    }

    async fn after_process_hook(&mut self, batch: &[Record]) -> Result<(), SourceError> {
        let mut acked = self.acked.lock().await;
        for record in batch {
            acked.push(record.id().to_string());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

struct FailingAckSource {
    remaining: Mutex<VecDeque<RawRecord>>,
}

#[async_trait]
impl Source for FailingAckSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn fetch(
        &mut self,
        _token: &CancellationToken,
        size: usize,
    ) -> Result<FetchOutcome, SourceError> {
        let mut remaining = self.remaining.lock().await;
        if remaining.is_empty() {
            return Ok(FetchOutcome::EndOfStream);
        }
        let mut batch = Vec::new();
        for _ in 0..size {
            match remaining.pop_front() {
                Some(r) => batch.push(r),
                None => break,
            }
        }
        Ok(FetchOutcome::Batch(batch))
    }

    async fn after_process_hook(&mut self, _batch: &[Record]) -> Result<(), SourceError> {
        Err(SourceError::AfterProcessHook("downstream ack sink unavailable".to_string()))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

struct FakeEmbedder {
    dimension: usize,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _token: &CancellationToken, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.contains("FAIL") {
            return Err(EmbedderError::Request("embedding service rejected input".to_string()));
        }
        Ok(vec![0.5; self.dimension])
    }
}

struct InMemoryStorage {
    stored: Arc<Mutex<Vec<Record>>>,
    fail: bool,
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn connect(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn store(&mut self, _token: &CancellationToken, batch: &[Record]) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::Store("simulated storage outage".to_string()));
        }
        let mut stored = self.stored.lock().await;
        stored.extend_from_slice(batch);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Scenario A: a full batch embeds and stores cleanly, and every record
/// is acknowledged exactly once.
#[tokio::test]
async fn happy_batch_is_stored_and_acknowledged() {
    let records: Vec<RawRecord> = (0..10).map(|i| raw(&format!("r{i}"), "hello world")).collect();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(InMemorySource::new(records, acked.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let supervisor = Supervisor::new(test_config(5, 2, 5, true), source, embedder, storage);
    let result = supervisor.run(CancellationToken::new()).await;

    assert!(result.is_ok());
    assert_eq!(stored.lock().await.len(), 10);
    assert_eq!(acked.lock().await.len(), 10);
}

/// Scenario B: one record fails to embed; with `skip_embedder_errors`
/// enabled the rest of the batch still lands, and the failed record is
/// never stored or acknowledged (left for the source to redeliver).
#[tokio::test]
async fn embed_failure_is_isolated_when_skip_enabled() {
    let records = vec![raw("ok-1", "hello"), raw("bad-1", "please FAIL this one"), raw("ok-2", "world")];
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(InMemorySource::new(records, acked.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let supervisor = Supervisor::new(test_config(5, 2, 5, true), source, embedder, storage);
    let result = supervisor.run(CancellationToken::new()).await;

    assert!(result.is_ok());
    let stored_ids: Vec<String> = stored.lock().await.iter().map(|r| r.id().to_string()).collect();
    assert!(stored_ids.contains(&"ok-1".to_string()));
    assert!(stored_ids.contains(&"ok-2".to_string()));
    assert!(!stored_ids.contains(&"bad-1".to_string()));
    assert!(!acked.lock().await.contains(&"bad-1".to_string()));
}

/// Scenario C: storage is unreachable. A store failure is fatal: the
/// supervisor tears the run down and reports the error rather than
/// silently dropping records.
#[tokio::test]
async fn storage_failure_is_fatal() {
    let records: Vec<RawRecord> = (0..5).map(|i| raw(&format!("r{i}"), "hello")).collect();
    let acked = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(InMemorySource::new(records, acked.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: Arc::new(Mutex::new(Vec::new())),
        fail: true,
    });

    let supervisor = Supervisor::new(test_config(5, 1, 5, true), source, embedder, storage);
    let result = supervisor.run(CancellationToken::new()).await;

    assert!(result.is_err());
    assert!(acked.lock().await.is_empty());
}

/// Scenario C variant: an acknowledgement failure after a successful
/// store is equally fatal, since it breaks the at-least-once guarantee
/// in the other direction (a record could be stored and never acked,
/// risking a duplicate-but-harmless redelivery is fine; silently
/// continuing past a broken ack channel is not).
#[tokio::test]
async fn acknowledgement_failure_is_fatal() {
    let records: Vec<RawRecord> = (0..5).map(|i| raw(&format!("r{i}"), "hello")).collect();
    let source = Box::new(FailingAckSource {
        remaining: Mutex::new(records.into()),
    });
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: Arc::new(Mutex::new(Vec::new())),
        fail: false,
    });

    let supervisor = Supervisor::new(test_config(5, 1, 5, true), source, embedder, storage);
    let result = supervisor.run(CancellationToken::new()).await;

    assert!(result.is_err());
}

/// Scenario D: cancelling mid-run stops fetch promptly and lets
/// already-in-flight records drain instead of being abandoned.
#[tokio::test]
async fn cancellation_mid_batch_drains_in_flight_records() {
    let records: Vec<RawRecord> = (0..200).map(|i| raw(&format!("r{i}"), "hello")).collect();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source =
        Box::new(InMemorySource::new(records, acked.clone()).with_delay(Duration::from_millis(20)));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let supervisor = Arc::new(Supervisor::new(test_config(5, 2, 5, true), source, embedder, storage));
    let token = CancellationToken::new();

    let run_supervisor = supervisor.clone();
    let run_token = token.child_token();
    let handle = tokio::spawn(async move { run_supervisor.run(run_token).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should finish within the timeout")
        .expect("run task should not panic");

    assert!(result.is_err());
    assert!(result.unwrap_err().is_cancelled());
    // Cancellation stops fetch quickly, so only a handful of batches
    // make it all the way through; the point is that the run ends
    // rather than hangs, not an exact count.
    assert!(stored.lock().await.len() < 200);
}

/// Scenario E: pausing stops new fetches without tearing the pipeline
/// down, and resuming lets it pick back up.
#[tokio::test]
async fn pause_then_resume_resumes_fetching() {
    let records: Vec<RawRecord> = (0..20).map(|i| raw(&format!("r{i}"), "hello")).collect();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(InMemorySource::new(records, acked.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let supervisor = Arc::new(Supervisor::new(test_config(5, 2, 5, true), source, embedder, storage));
    supervisor.pause().await;
    assert!(supervisor.is_paused());

    let run_supervisor = supervisor.clone();
    let handle = tokio::spawn(async move { run_supervisor.run(CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stored.lock().await.len(), 0, "paused pipeline should not have stored anything yet");

    supervisor.resume().await;
    assert!(!supervisor.is_paused());

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should finish once resumed")
        .expect("run task should not panic");

    assert!(result.is_ok());
    assert_eq!(stored.lock().await.len(), 20);
}

/// A transient fetch failure is logged and retried, not fatal: the run
/// still completes and every record is eventually stored and acked.
#[tokio::test]
async fn transient_fetch_errors_are_not_fatal() {
    let records: Vec<RawRecord> = (0..6).map(|i| raw(&format!("r{i}"), "hello")).collect();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(FlakySource {
        remaining: Mutex::new(records.into()),
        failures_left: Mutex::new(3),
        acked: acked.clone(),
    });
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let supervisor = Supervisor::new(test_config(3, 1, 3, true), source, embedder, storage);
    let result = supervisor.run(CancellationToken::new()).await;

    assert!(result.is_ok());
    assert_eq!(stored.lock().await.len(), 6);
    assert_eq!(acked.lock().await.len(), 6);
}

/// With `skip_embedder_errors` disabled, a failing embed is still
/// isolated to its own record rather than tearing down the run — the
/// flag only changes how loudly the failure is logged, not whether it
/// is fatal.
#[tokio::test]
async fn embed_failure_is_isolated_when_skip_disabled() {
    let records = vec![raw("ok-1", "hello"), raw("bad-1", "please FAIL this one"), raw("ok-2", "world")];
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(InMemorySource::new(records, acked.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let supervisor = Supervisor::new(test_config(5, 2, 5, false), source, embedder, storage);
    let result = supervisor.run(CancellationToken::new()).await;

    assert!(result.is_ok(), "a per-record embed error must never be fatal");
    let stored_ids: Vec<String> = stored.lock().await.iter().map(|r| r.id().to_string()).collect();
    assert!(stored_ids.contains(&"ok-1".to_string()));
    assert!(stored_ids.contains(&"ok-2".to_string()));
    assert!(!stored_ids.contains(&"bad-1".to_string()));
    assert!(!acked.lock().await.contains(&"bad-1".to_string()));
}

/// A source adapter call that never returns is bounded by the
/// configured response timeout rather than hanging the pipeline
/// forever.
#[tokio::test]
async fn fetch_timeout_is_enforced() {
    let records: Vec<RawRecord> = (0..2).map(|i| raw(&format!("r{i}"), "hello")).collect();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));

    let source = Box::new(
        InMemorySource::new(records, acked.clone()).with_delay(Duration::from_secs(10)),
    );
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dimension: 4 });
    let storage = Box::new(InMemoryStorage {
        stored: stored.clone(),
        fail: false,
    });

    let mut config = test_config(2, 1, 2, true);
    config.fetch_timeout = Duration::from_millis(50);
    let supervisor = Arc::new(Supervisor::new(config, source, embedder, storage));
    let token = CancellationToken::new();

    let run_supervisor = supervisor.clone();
    let run_token = token.child_token();
    let handle = tokio::spawn(async move { run_supervisor.run(run_token).await });

    // The fetch call always times out, so the stage never makes
    // progress; cancel after giving it a couple of timed-out attempts
    // and confirm the run still unwinds promptly rather than hanging
    // on the slow adapter call.
    tokio::time::sleep(Duration::from_millis(150)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should finish within the timeout")
        .expect("run task should not panic");

    assert!(result.is_err());
    assert!(result.unwrap_err().is_cancelled());
}
