//! Capability-set traits for the three external collaborators the core
//! pipeline talks to. Variants are selected by a factory from typed
//! configuration (see `config`), not by a class hierarchy: adding a
//! fourth message-bus source means adding a variant and a match arm, not
//! touching the pipeline.

pub mod embedder;
pub mod source;
pub mod storage;

pub use embedder::Embedder;
pub use source::Source;
pub use storage::Storage;
