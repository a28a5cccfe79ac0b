//! Source adapter: yields records on demand, acknowledges them once
//! durably stored.

mod nats;
mod redis_streams;

pub use nats::NatsSource;
pub use redis_streams::RedisStreamsSource;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::config::SourceVariant;
use crate::error::SourceError;
use crate::record::{FetchOutcome, Record};

#[async_trait]
pub trait Source: Send + Sync {
    async fn connect(&mut self) -> Result<(), SourceError>;

    async fn fetch(
        &mut self,
        token: &CancellationToken,
        size: usize,
    ) -> Result<FetchOutcome, SourceError>;

    /// Best-effort pre-processing hook. Default no-op: most sources
    /// don't need one. A hook error is logged and non-fatal.
    async fn before_process_hook(&mut self, _batch: &[Record]) -> Result<(), SourceError> {
        Ok(())
    }

    /// Acknowledgement. An error here is fatal: it breaks the
    /// acknowledgement invariant, so the supervisor terminates the run
    /// rather than risk a silently unacknowledged record.
    async fn after_process_hook(&mut self, batch: &[Record]) -> Result<(), SourceError>;

    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Builds the configured source variant from a factory, keyed on the
/// `source_type` discriminant rather than a class hierarchy.
pub fn build(variant: &SourceVariant) -> Box<dyn Source> {
    match variant {
        SourceVariant::Nats(cfg) => Box::new(NatsSource::new(cfg.clone())),
        SourceVariant::RedisStreams(cfg) => Box::new(RedisStreamsSource::new(cfg.clone())),
    }
}
