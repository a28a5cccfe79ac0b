//! HTTP embedding-service client adapter.
//!
//! A `reqwest` client with exponential backoff and jitter on transient
//! failures, trimmed to what an embedder needs: no circuit breaker, no
//! per-source rate limiter, since the core already bounds concurrency
//! via `embedder_workers`.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use super::Embedder;
use crate::cancellation::CancellationToken;
use crate::config::HttpEmbedderConfig;
use crate::error::EmbedderError;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: Client,
    cfg: HttpEmbedderConfig,
}

impl HttpEmbedder {
    pub fn new(cfg: HttpEmbedderConfig) -> Self {
        let client = Client::builder()
            .user_agent(format!("vectrain-pipeline/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client builder with only a user agent set cannot fail");

        Self { client, cfg }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let url = format!("{}/embeddings", self.cfg.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.cfg.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Request(format!(
                "embedder returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Request(e.to_string()))?;
        Ok(parsed.embedding)
    }

    fn is_retryable(err: &EmbedderError) -> bool {
        match err {
            EmbedderError::Request(msg) => {
                msg.contains(StatusCode::TOO_MANY_REQUESTS.as_str())
                    || msg.contains(StatusCode::SERVICE_UNAVAILABLE.as_str())
                    || msg.contains(StatusCode::BAD_GATEWAY.as_str())
                    || msg.contains(StatusCode::GATEWAY_TIMEOUT.as_str())
            }
            EmbedderError::Timeout => true,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.cfg.dimension
    }

    async fn embed(&self, token: &CancellationToken, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(2))
            .with_randomization_factor(0.5)
            .with_max_elapsed_time(Some(Duration::from_secs(10)))
            .build();

        retry(backoff, || async {
            if token.is_cancelled() {
                return Err(backoff::Error::permanent(EmbedderError::Request(
                    "cancelled".to_string(),
                )));
            }
            match self.embed_once(text).await {
                Ok(vector) => Ok(vector),
                Err(e) if Self::is_retryable(&e) => {
                    warn!(error = %e, "transient embedder error, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}
