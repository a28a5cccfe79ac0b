//! Error types for the vectorization pipeline.
//!
//! Three adapter-facing error types (`SourceError`, `EmbedderError`,
//! `StorageError`) plus the supervisor-facing `PipelineError` that wraps
//! whichever of them escalates to fatal. Transient fetch errors and
//! per-record embed errors never reach `PipelineError` — they are logged
//! at the stage that observed them (see `pipeline::fetch` and
//! `pipeline::embed`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("before-process hook failed: {0}")]
    BeforeProcessHook(String),

    #[error("after-process hook (acknowledgement) failed: {0}")]
    AfterProcessHook(String),

    #[error("timed out waiting for response")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("timed out waiting for response")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("store failed: {0}")]
    Store(String),

    #[error("timed out waiting for response")]
    Timeout,
}

/// Errors the supervisor surfaces from `Supervisor::run`.
///
/// `Cancelled` is not really an error: it's the marker returned on a
/// graceful shutdown so callers can tell it apart from a failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
