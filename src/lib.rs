//! Streaming vectorization pipeline: fetch records from a source,
//! embed their text, persist the embeddings, and acknowledge the
//! source only once the write has durably landed.

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod record;

pub use cancellation::CancellationToken;
pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::{State, Supervisor};
pub use record::{EmbedOutcome, FetchOutcome, RawRecord, Record, SourceRef};
