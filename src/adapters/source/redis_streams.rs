//! Redis Streams source adapter.
//!
//! Uses a consumer-group read/ack pair: `XREADGROUP` stands in for
//! `fetch`, `XACK` stands in for `after_process_hook`.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, streams::StreamReadOptions, AsyncCommands, Client, RedisResult};
use tracing::{debug, info, warn};

use super::Source;
use crate::cancellation::CancellationToken;
use crate::config::RedisStreamsSourceConfig;
use crate::error::SourceError;
use crate::record::{FetchOutcome, RawRecord, Record, SourceRef};

const CONSUMER_GROUP: &str = "vectrain-pipeline";

pub struct RedisStreamsSource {
    cfg: RedisStreamsSourceConfig,
    conn: Option<ConnectionManager>,
    consumer_name: String,
}

impl RedisStreamsSource {
    pub fn new(cfg: RedisStreamsSourceConfig) -> Self {
        let consumer_name = format!("consumer-{}", uuid::Uuid::new_v4());
        Self {
            cfg,
            conn: None,
            consumer_name,
        }
    }

    fn conn(&self) -> Result<ConnectionManager, SourceError> {
        self.conn
            .clone()
            .ok_or_else(|| SourceError::Connection("not connected".to_string()))
    }

    async fn ensure_consumer_group(&self, conn: &mut ConnectionManager) -> Result<(), SourceError> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.cfg.stream)
            .arg(CONSUMER_GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(_) => {
                info!(stream = %self.cfg.stream, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.cfg.stream, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(SourceError::Connection(e.to_string())),
        }
    }
}

#[async_trait]
impl Source for RedisStreamsSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let client = Client::open(self.cfg.url.as_str())
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        self.ensure_consumer_group(&mut conn).await?;
        info!(stream = %self.cfg.stream, "connected to Redis Streams");
        self.conn = Some(conn);
        Ok(())
    }

    async fn fetch(
        &mut self,
        _token: &CancellationToken,
        size: usize,
    ) -> Result<FetchOutcome, SourceError> {
        let mut conn = self.conn()?;

        let opts = StreamReadOptions::default()
            .group(CONSUMER_GROUP, &self.consumer_name)
            .count(size)
            .block(200);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[self.cfg.stream.as_str()], &[">"], &opts)
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        let mut batch = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let mut fields: HashMap<String, String> = HashMap::new();
                for (field, value) in entry.map {
                    if let redis::Value::BulkString(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                    }
                }

                let id = fields.remove("id");
                let text = fields.remove("text").unwrap_or_default();

                batch.push(RawRecord {
                    id,
                    source_ref: SourceRef::from_str(&entry.id),
                    text,
                    payload: fields,
                });
            }
        }

        Ok(FetchOutcome::Batch(batch))
    }

    async fn after_process_hook(&mut self, batch: &[Record]) -> Result<(), SourceError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;

        let ids: Vec<String> = batch
            .iter()
            .map(|r| String::from_utf8_lossy(&r.source_ref().0).into_owned())
            .collect();

        let mut cmd = redis::cmd("XACK");
        cmd.arg(&self.cfg.stream).arg(CONSUMER_GROUP);
        for id in &ids {
            cmd.arg(id.as_str());
        }

        let _: i64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| SourceError::AfterProcessHook(e.to_string()))?;

        debug!(count = ids.len(), "acknowledged Redis Stream entries");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.conn = None;
        info!("Redis Streams source closed");
        Ok(())
    }
}
