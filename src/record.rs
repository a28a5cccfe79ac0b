//! The record type that flows through the pipeline.
//!
//! A `Record` is created by the fetch stage, mutated only by the embed
//! stage, and consumed by the store stage. `EmbedOutcome` encodes the
//! "exactly one of vector or error" invariant in the type itself rather
//! than in two `Option` fields that callers have to keep in sync.

use std::collections::HashMap;

use uuid::Uuid;

/// Opaque handle the source adapter needs to acknowledge a record.
///
/// The core never inspects this value; it is carried unchanged from the
/// fetch stage to the store stage and handed back to the source adapter
/// verbatim in `after_process_hook`. Adapters encode whatever they need
/// inside it (partition + offset, a stream entry id, a request token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef(pub Vec<u8>);

impl SourceRef {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_str(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().as_bytes().to_vec())
    }
}

/// A record exactly as the source adapter produced it, before the fetch
/// stage assigns a missing `id` and validates `text`.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: Option<String>,
    pub source_ref: SourceRef,
    pub text: String,
    pub payload: HashMap<String, String>,
}

/// Result of attaching an embedding to a record's text.
///
/// `Pending` only exists between construction and the embed stage
/// running; every record that reaches the store stage is either
/// `Embedded` or `Failed`, never `Pending`.
#[derive(Debug, Clone)]
pub enum EmbedOutcome {
    Pending,
    Embedded(Vec<f32>),
    Failed(String),
}

impl EmbedOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, EmbedOutcome::Pending)
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            EmbedOutcome::Embedded(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EmbedOutcome::Failed(_))
    }
}

/// The unit of work flowing through fetch -> embed -> store.
#[derive(Debug, Clone)]
pub struct Record {
    id: String,
    source_ref: SourceRef,
    pub text: String,
    pub payload: HashMap<String, String>,
    pub embed_outcome: EmbedOutcome,
}

impl Record {
    /// Builds a record from what the source produced, assigning a fresh
    /// id if the source didn't provide one. `id` is immutable from here
    /// on: there is no setter.
    pub fn from_raw(raw: RawRecord) -> Self {
        Self {
            id: raw.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            source_ref: raw.source_ref,
            text: raw.text,
            payload: raw.payload,
            embed_outcome: EmbedOutcome::Pending,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_ref(&self) -> &SourceRef {
        &self.source_ref
    }

    /// A record is storable once embedding succeeded. Records that
    /// failed embedding are never passed to `storage.store`.
    pub fn is_storable(&self) -> bool {
        matches!(self.embed_outcome, EmbedOutcome::Embedded(_))
    }
}

/// What the source returned for one poll.
pub enum FetchOutcome {
    Batch(Vec<RawRecord>),
    /// The source has no more data and will never produce more. Distinct
    /// from an empty batch so a bounded/replay source can let the
    /// pipeline reach natural completion instead of polling forever.
    EndOfStream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_id_when_source_omits_it() {
        let raw = RawRecord {
            id: None,
            source_ref: SourceRef::from_str("part-0/offset-1"),
            text: "hello".to_string(),
            payload: HashMap::new(),
        };
        let record = Record::from_raw(raw);
        assert!(!record.id().is_empty());
        assert!(record.embed_outcome.is_pending());
    }

    #[test]
    fn keeps_source_provided_id() {
        let raw = RawRecord {
            id: Some("row-42".to_string()),
            source_ref: SourceRef::from_str("x"),
            text: "hello".to_string(),
            payload: HashMap::new(),
        };
        let record = Record::from_raw(raw);
        assert_eq!(record.id(), "row-42");
    }

    #[test]
    fn storable_only_after_embedding_succeeds() {
        let mut record = Record::from_raw(RawRecord {
            id: Some("1".to_string()),
            source_ref: SourceRef::from_str("x"),
            text: "hello".to_string(),
            payload: HashMap::new(),
        });
        assert!(!record.is_storable());

        record.embed_outcome = EmbedOutcome::Failed("timeout".to_string());
        assert!(!record.is_storable());

        record.embed_outcome = EmbedOutcome::Embedded(vec![0.1, 0.2]);
        assert!(record.is_storable());
    }
}
