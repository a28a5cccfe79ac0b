//! NATS JetStream source adapter.
//!
//! Records are pulled from a durable pull consumer, and `source_ref`
//! carries the message's JetStream reply subject so `after_process_hook`
//! can ack it later without holding on to the `async_nats::Message`
//! itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use async_nats::jetstream::{
    self,
    consumer::{pull::Config as ConsumerConfig, Consumer},
    Context,
};
use async_nats::Client;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Source;
use crate::cancellation::CancellationToken;
use crate::config::NatsSourceConfig;
use crate::error::SourceError;
use crate::record::{FetchOutcome, RawRecord, Record, SourceRef};

/// Wire shape of a record on the NATS subject. The embedder/storage
/// adapters never see this; only the fetch path does.
#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    id: Option<String>,
    text: String,
    #[serde(default)]
    payload: HashMap<String, String>,
}

pub struct NatsSource {
    cfg: NatsSourceConfig,
    client: Option<Client>,
    consumer: Option<Consumer<ConsumerConfig>>,
}

impl NatsSource {
    pub fn new(cfg: NatsSourceConfig) -> Self {
        Self {
            cfg,
            client: None,
            consumer: None,
        }
    }
}

#[async_trait]
impl Source for NatsSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let client = async_nats::connect(&self.cfg.url)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let jetstream: Context = jetstream::new(client.clone());

        let stream = jetstream
            .get_stream(&self.cfg.stream)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        let consumer_config = ConsumerConfig {
            durable_name: Some(self.cfg.durable_consumer.clone()),
            ack_wait: Duration::from_secs(30),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&self.cfg.durable_consumer, consumer_config)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        info!(stream = %self.cfg.stream, "connected to NATS JetStream");
        self.client = Some(client);
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn fetch(
        &mut self,
        _token: &CancellationToken,
        size: usize,
    ) -> Result<FetchOutcome, SourceError> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| SourceError::Fetch("not connected".to_string()))?;

        let mut messages = consumer
            .fetch()
            .max_messages(size)
            .expires(Duration::from_millis(200))
            .messages()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        let mut batch = Vec::new();
        while let Some(msg) = messages.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "error reading NATS message");
                    continue;
                }
            };

            let reply = match &msg.reply {
                Some(reply) => reply.to_string(),
                None => {
                    warn!("NATS message missing reply subject, cannot be acked, dropping");
                    continue;
                }
            };

            match serde_json::from_slice::<WireRecord>(&msg.payload) {
                Ok(wire) => batch.push(RawRecord {
                    id: wire.id,
                    source_ref: SourceRef::from_str(&reply),
                    text: wire.text,
                    payload: wire.payload,
                }),
                Err(e) => warn!(error = %e, "failed to decode NATS message payload, skipping"),
            }
        }

        Ok(FetchOutcome::Batch(batch))
    }

    async fn after_process_hook(&mut self, batch: &[Record]) -> Result<(), SourceError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SourceError::AfterProcessHook("not connected".to_string()))?;

        for record in batch {
            let reply_subject = String::from_utf8_lossy(&record.source_ref().0).into_owned();
            client
                .publish(reply_subject, "+ACK".into())
                .await
                .map_err(|e| SourceError::AfterProcessHook(e.to_string()))?;
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.consumer = None;
        self.client = None;
        info!("NATS JetStream source closed");
        Ok(())
    }
}
