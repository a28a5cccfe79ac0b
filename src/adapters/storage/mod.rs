//! Storage adapter: persists batches of embedded records idempotently
//! by id.

mod qdrant;

pub use qdrant::QdrantStorage;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::config::StorageVariant;
use crate::error::StorageError;
use crate::record::Record;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn connect(&mut self) -> Result<(), StorageError>;

    /// Must be idempotent on `id`: duplicate ids within a batch or
    /// across calls collapse to the last write.
    async fn store(&mut self, token: &CancellationToken, batch: &[Record]) -> Result<(), StorageError>;

    async fn close(&mut self) -> Result<(), StorageError>;
}

pub fn build(variant: &StorageVariant) -> Box<dyn Storage> {
    match variant {
        StorageVariant::Qdrant(cfg) => Box::new(QdrantStorage::new(cfg.clone())),
    }
}
