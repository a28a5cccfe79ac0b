//! Embedder adapter: maps text to a fixed-dimension vector. Stateless
//! and safe to call concurrently from every embed worker.

mod http;

pub use http::HttpEmbedder;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::config::EmbedderVariant;
use crate::error::EmbedderError;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, token: &CancellationToken, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

pub fn build(variant: &EmbedderVariant) -> std::sync::Arc<dyn Embedder> {
    match variant {
        EmbedderVariant::Http(cfg) => std::sync::Arc::new(HttpEmbedder::new(cfg.clone())),
    }
}
