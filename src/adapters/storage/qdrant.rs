//! Qdrant-shaped vector storage adapter, built on a plain `reqwest`
//! client against Qdrant's REST API rather than a gRPC client crate.
//!
//! Ensures the collection exists (creating it from the configured
//! vector size and distance metric if not), then upserts points keyed
//! by id. A payload field missing from a record's `payload` map is
//! written as an empty string rather than omitted, so the collection's
//! payload schema stays uniform across points.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::Storage;
use crate::cancellation::CancellationToken;
use crate::config::QdrantStorageConfig;
use crate::error::StorageError;
use crate::record::Record;

pub struct QdrantStorage {
    client: Client,
    cfg: QdrantStorageConfig,
    collection_checked: bool,
}

impl QdrantStorage {
    pub fn new(cfg: QdrantStorageConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
            collection_checked: false,
        }
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/collections/{}",
            self.cfg.url.trim_end_matches('/'),
            self.cfg.collection
        )
    }

    async fn ensure_collection(&mut self) -> Result<(), StorageError> {
        if self.collection_checked {
            return Ok(());
        }

        let exists = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .status()
            .is_success();

        if !exists {
            let body = json!({
                "vectors": {
                    "size": self.cfg.vector_size,
                    "distance": self.cfg.distance,
                }
            });

            let response = self
                .client
                .put(self.collection_url())
                .json(&body)
                .send()
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StorageError::Connection(format!(
                    "failed to create collection: {body}"
                )));
            }
            info!(collection = %self.cfg.collection, "created Qdrant collection");
        }

        self.collection_checked = true;
        Ok(())
    }

    fn payload_json(&self, record: &Record) -> Value {
        let mut payload: HashMap<&str, String> = HashMap::new();
        for field in &self.cfg.payload_fields {
            let value = record.payload.get(field).cloned().unwrap_or_default();
            payload.insert(field.as_str(), value);
        }
        json!(payload)
    }
}

#[async_trait]
impl Storage for QdrantStorage {
    async fn connect(&mut self) -> Result<(), StorageError> {
        self.ensure_collection().await
    }

    async fn store(&mut self, _token: &CancellationToken, batch: &[Record]) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        self.ensure_collection().await?;

        let points: Vec<Value> = batch
            .iter()
            .map(|record| {
                let vector = record
                    .embed_outcome
                    .vector()
                    .expect("store is only called with records that embedded successfully");
                json!({
                    "id": record.id(),
                    "vector": vector,
                    "payload": self.payload_json(record),
                })
            })
            .collect();

        let url = format!("{}/points", self.collection_url());
        let response = self
            .client
            .put(url)
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| StorageError::Store(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Store(format!("upsert failed: {body}")));
        }

        debug!(count = batch.len(), "upserted points into Qdrant");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
