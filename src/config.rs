//! Configuration for the vectorization pipeline.
//!
//! Loaded from environment variables (layered over an optional `.env`
//! file) via the `config`/`dotenvy` pair. Adapter selection can't be
//! expressed as a single serde-tagged enum over a flat environment
//! namespace, so this follows a raw-then-typed two-pass shape:
//! `RawConfig` deserializes the flat namespace, then `Config::from_raw`
//! dispatches on the `*_type` discriminants to build the typed adapter
//! variant enums the rest of the crate matches on.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub enum SourceVariant {
    Nats(NatsSourceConfig),
    RedisStreams(RedisStreamsSourceConfig),
}

#[derive(Debug, Clone)]
pub struct NatsSourceConfig {
    pub url: String,
    pub stream: String,
    pub durable_consumer: String,
}

#[derive(Debug, Clone)]
pub struct RedisStreamsSourceConfig {
    pub url: String,
    pub stream: String,
}

#[derive(Debug, Clone)]
pub enum EmbedderVariant {
    Http(HttpEmbedderConfig),
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone)]
pub enum StorageVariant {
    Qdrant(QdrantStorageConfig),
}

#[derive(Debug, Clone)]
pub struct QdrantStorageConfig {
    pub url: String,
    pub collection: String,
    pub vector_size: usize,
    pub distance: String,
    pub payload_fields: Vec<String>,
}

/// Flat shape matching the environment namespace. Every field here is
/// either required-by-the-chosen-discriminant or has a sane default;
/// `Config::from_raw` is where "required because `source_type = nats`"
/// gets enforced.
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default = "default_source_type")]
    source_type: String,
    #[serde(default = "default_nats_url")]
    nats_url: String,
    #[serde(default = "default_nats_stream")]
    nats_stream: String,
    #[serde(default = "default_nats_durable_consumer")]
    nats_durable_consumer: String,
    #[serde(default = "default_redis_url")]
    redis_url: String,
    #[serde(default = "default_redis_stream")]
    redis_stream: String,

    #[serde(default = "default_embedder_type")]
    embedder_type: String,
    #[serde(default = "default_embedder_base_url")]
    embedder_base_url: String,
    #[serde(default = "default_embedder_model")]
    embedder_model: String,
    #[serde(default = "default_embedder_dimension")]
    embedder_dimension: usize,

    #[serde(default = "default_storage_type")]
    storage_type: String,
    #[serde(default = "default_qdrant_url")]
    qdrant_url: String,
    #[serde(default = "default_qdrant_collection")]
    qdrant_collection: String,
    #[serde(default = "default_qdrant_vector_size")]
    qdrant_vector_size: usize,
    #[serde(default = "default_qdrant_distance")]
    qdrant_distance: String,
    #[serde(default = "default_qdrant_payload_fields")]
    qdrant_payload_fields: String,

    #[serde(default = "default_source_batch_size")]
    source_batch_size: usize,
    #[serde(default = "default_embedder_workers")]
    embedder_workers: usize,
    #[serde(default = "default_storage_batch_size")]
    storage_batch_size: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    fetch_timeout_ms: u64,
    #[serde(default = "default_embed_timeout_ms")]
    embed_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    store_timeout_ms: u64,
    #[serde(default = "default_skip_embedder_errors")]
    skip_embedder_errors: bool,
    #[serde(default = "default_shutdown_grace_ms")]
    shutdown_grace_ms: u64,

    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
    #[serde(default = "default_metrics_enabled")]
    metrics_enabled: bool,
    #[serde(default = "default_control_port")]
    control_port: u16,
}

fn default_source_type() -> String {
    "nats".to_string()
}
fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}
fn default_nats_stream() -> String {
    "vectrain-records".to_string()
}
fn default_nats_durable_consumer() -> String {
    "vectrain-pipeline".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_redis_stream() -> String {
    "vectrain:records".to_string()
}
fn default_embedder_type() -> String {
    "http".to_string()
}
fn default_embedder_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_embedder_model() -> String {
    "text-embedding".to_string()
}
fn default_embedder_dimension() -> usize {
    384
}
fn default_storage_type() -> String {
    "qdrant".to_string()
}
fn default_qdrant_url() -> String {
    "http://127.0.0.1:6333".to_string()
}
fn default_qdrant_collection() -> String {
    "vectrain-records".to_string()
}
fn default_qdrant_vector_size() -> usize {
    384
}
fn default_qdrant_distance() -> String {
    "Cosine".to_string()
}
fn default_qdrant_payload_fields() -> String {
    String::new()
}
fn default_source_batch_size() -> usize {
    100
}
fn default_embedder_workers() -> usize {
    4
}
fn default_storage_batch_size() -> usize {
    100
}
fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_embed_timeout_ms() -> u64 {
    10_000
}
fn default_store_timeout_ms() -> u64 {
    10_000
}
fn default_skip_embedder_errors() -> bool {
    true
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_control_port() -> u16 {
    8080
}

/// Fully resolved, typed configuration. Built once at startup by
/// `Config::load` and then shared read-only (`Arc<Config>`) by the
/// supervisor and the control surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceVariant,
    pub embedder: EmbedderVariant,
    pub storage: StorageVariant,

    pub source_batch_size: usize,
    pub embedder_workers: usize,
    pub storage_batch_size: usize,
    /// Per-call deadline for the source adapter: `fetch` and both
    /// process hooks.
    pub fetch_timeout: Duration,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
    pub skip_embedder_errors: bool,
    pub shutdown_grace: Duration,

    pub metrics_port: u16,
    pub metrics_enabled: bool,
    pub control_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let raw = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let raw: RawConfig = raw.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let source = match raw.source_type.as_str() {
            "nats" | "nats_jetstream" => SourceVariant::Nats(NatsSourceConfig {
                url: raw.nats_url,
                stream: raw.nats_stream,
                durable_consumer: raw.nats_durable_consumer,
            }),
            "redis" | "redis_streams" => SourceVariant::RedisStreams(RedisStreamsSourceConfig {
                url: raw.redis_url,
                stream: raw.redis_stream,
            }),
            other => return Err(anyhow!("unknown source_type: {other}")),
        };

        let embedder = match raw.embedder_type.as_str() {
            "http" => EmbedderVariant::Http(HttpEmbedderConfig {
                base_url: raw.embedder_base_url,
                model: raw.embedder_model,
                dimension: raw.embedder_dimension,
            }),
            other => return Err(anyhow!("unknown embedder_type: {other}")),
        };

        let storage = match raw.storage_type.as_str() {
            "qdrant" => StorageVariant::Qdrant(QdrantStorageConfig {
                url: raw.qdrant_url,
                collection: raw.qdrant_collection,
                vector_size: raw.qdrant_vector_size,
                distance: raw.qdrant_distance,
                payload_fields: raw
                    .qdrant_payload_fields
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            other => return Err(anyhow!("unknown storage_type: {other}")),
        };

        Ok(Config {
            source,
            embedder,
            storage,
            source_batch_size: raw.source_batch_size,
            embedder_workers: raw.embedder_workers,
            storage_batch_size: raw.storage_batch_size,
            fetch_timeout: Duration::from_millis(raw.fetch_timeout_ms),
            embed_timeout: Duration::from_millis(raw.embed_timeout_ms),
            store_timeout: Duration::from_millis(raw.store_timeout_ms),
            skip_embedder_errors: raw.skip_embedder_errors,
            shutdown_grace: Duration::from_millis(raw.shutdown_grace_ms),
            metrics_port: raw.metrics_port,
            metrics_enabled: raw.metrics_enabled,
            control_port: raw.control_port,
        })
    }

    /// Checked separately from construction so a malformed value (e.g.
    /// a zero worker count) surfaces as a configuration error rather
    /// than a panic deep in the supervisor.
    pub fn validate(&self) -> Result<()> {
        if self.source_batch_size == 0 {
            return Err(anyhow!("source_batch_size must be greater than zero"));
        }
        if self.embedder_workers == 0 {
            return Err(anyhow!("embedder_workers must be greater than zero"));
        }
        if self.storage_batch_size == 0 {
            return Err(anyhow!("storage_batch_size must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_defaults() -> RawConfig {
        RawConfig {
            source_type: default_source_type(),
            nats_url: default_nats_url(),
            nats_stream: default_nats_stream(),
            nats_durable_consumer: default_nats_durable_consumer(),
            redis_url: default_redis_url(),
            redis_stream: default_redis_stream(),
            embedder_type: default_embedder_type(),
            embedder_base_url: default_embedder_base_url(),
            embedder_model: default_embedder_model(),
            embedder_dimension: default_embedder_dimension(),
            storage_type: default_storage_type(),
            qdrant_url: default_qdrant_url(),
            qdrant_collection: default_qdrant_collection(),
            qdrant_vector_size: default_qdrant_vector_size(),
            qdrant_distance: default_qdrant_distance(),
            qdrant_payload_fields: "title,source".to_string(),
            source_batch_size: default_source_batch_size(),
            embedder_workers: default_embedder_workers(),
            storage_batch_size: default_storage_batch_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            embed_timeout_ms: default_embed_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            skip_embedder_errors: default_skip_embedder_errors(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            metrics_port: default_metrics_port(),
            metrics_enabled: default_metrics_enabled(),
            control_port: default_control_port(),
        }
    }

    #[test]
    fn from_raw_selects_nats_and_qdrant_by_default() {
        let cfg = Config::from_raw(raw_with_defaults()).unwrap();
        assert!(matches!(cfg.source, SourceVariant::Nats(_)));
        assert!(matches!(cfg.embedder, EmbedderVariant::Http(_)));
        assert!(matches!(cfg.storage, StorageVariant::Qdrant(_)));
        assert_eq!(cfg.embedder_workers, 4);
        cfg.validate().unwrap();
    }

    #[test]
    fn from_raw_selects_redis_streams() {
        let mut raw = raw_with_defaults();
        raw.source_type = "redis_streams".to_string();
        let cfg = Config::from_raw(raw).unwrap();
        assert!(matches!(cfg.source, SourceVariant::RedisStreams(_)));
    }

    #[test]
    fn from_raw_rejects_unknown_source_type() {
        let mut raw = raw_with_defaults();
        raw.source_type = "kafka".to_string();
        assert!(Config::from_raw(raw).is_err());
    }

    #[test]
    fn payload_fields_split_on_comma() {
        let cfg = Config::from_raw(raw_with_defaults()).unwrap();
        match cfg.storage {
            StorageVariant::Qdrant(q) => {
                assert_eq!(q.payload_fields, vec!["title".to_string(), "source".to_string()])
            }
        }
    }

    #[test]
    fn zero_worker_count_fails_validation() {
        let mut raw = raw_with_defaults();
        raw.embedder_workers = 0;
        let cfg = Config::from_raw(raw).unwrap();
        assert!(cfg.validate().is_err());
    }
}
