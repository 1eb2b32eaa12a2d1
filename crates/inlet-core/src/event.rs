//! CDC event model.
//!
//! Every row emitted by the upstream replicator carries a user-data
//! payload, a metadata block naming its source system and table, an
//! operation code, and a commit timestamp. The operation code travels
//! on the wire as a single character; [`Operation`] is the typed form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The operation column attached to every replicated row.
pub const OPERATION: &str = "op";

/// The commit-timestamp column attached by the upstream replicator.
pub const COMMIT_TIMESTAMP: &str = "_commit_ts";

/// The error column added when writing rows to the violations zone.
pub const ERROR: &str = "error";

/// The zone-tag column added when writing rows to the violations zone.
pub const ZONE: &str = "zone";

/// Result type alias for event decoding.
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors raised while decoding raw events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The single-character wire code did not name a known operation.
    #[error("unknown operation code: {code:?}")]
    UnknownOperation {
        /// The offending wire code.
        code: String,
    },

    /// The metadata block could not be parsed.
    #[error("invalid event metadata: {message}")]
    InvalidMetadata {
        /// Description of the parse failure.
        message: String,
    },
}

/// A row-level change operation.
///
/// `Load` marks rows from an initial bulk import; the other three are
/// CDC deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Initial bulk import.
    Load,
    /// Row inserted at the source.
    Insert,
    /// Row updated at the source.
    Update,
    /// Row deleted at the source.
    Delete,
}

impl Operation {
    /// The CDC delta operations, in wire order.
    pub const CDC: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    /// Returns the single-character wire code for this operation.
    #[must_use]
    pub fn wire_code(self) -> &'static str {
        match self {
            Operation::Load => "L",
            Operation::Insert => "I",
            Operation::Update => "U",
            Operation::Delete => "D",
        }
    }

    /// Decodes an operation from its wire code.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownOperation`] for any code outside
    /// `L`, `I`, `U`, `D`.
    pub fn from_wire(code: &str) -> Result<Self> {
        match code {
            "L" => Ok(Operation::Load),
            "I" => Ok(Operation::Insert),
            "U" => Ok(Operation::Update),
            "D" => Ok(Operation::Delete),
            other => Err(EventError::UnknownOperation {
                code: other.to_string(),
            }),
        }
    }

    /// Returns true for the three CDC delta operations.
    #[must_use]
    pub fn is_cdc(self) -> bool {
        !matches!(self, Operation::Load)
    }

    /// Lowercase name used in raw-zone paths.
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Operation::Load => "load",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_code())
    }
}

/// The metadata block carried by every raw event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Source system the row originated from.
    pub source: String,
    /// Table the row belongs to.
    pub table: String,
}

impl EventMetadata {
    /// Parses a raw metadata JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidMetadata`] if the string is not a
    /// JSON object with `source` and `table` fields.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| EventError::InvalidMetadata {
            message: e.to_string(),
        })
    }
}

/// One raw event as landed by the event bus.
///
/// `data` and `metadata` are the undecoded JSON strings; the operation
/// and commit timestamp are decoded up front since every downstream
/// stage branches on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Raw user-data payload (JSON object as a string).
    pub data: String,
    /// Raw metadata block (JSON object as a string).
    pub metadata: String,
    /// The decoded operation code.
    pub operation: Operation,
    /// Commit timestamp, monotonic per source.
    pub committed_at: DateTime<Utc>,
}

/// An ordered, finite row set produced by one tick of an event source.
///
/// Batch ids are strictly increasing per streaming query.
#[derive(Debug, Clone)]
pub struct MicroBatch {
    /// Monotonically-increasing batch id.
    pub id: i64,
    /// The rows of this batch.
    pub records: Vec<RawRecord>,
}

impl MicroBatch {
    /// Creates a micro-batch.
    #[must_use]
    pub fn new(id: i64, records: Vec<RawRecord>) -> Self {
        Self { id, records }
    }

    /// Returns true when the batch carries no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of rows in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for op in [
            Operation::Load,
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
        ] {
            assert_eq!(Operation::from_wire(op.wire_code()).unwrap(), op);
        }
    }

    #[test]
    fn unknown_wire_code_is_rejected() {
        let err = Operation::from_wire("X").unwrap_err();
        assert!(matches!(err, EventError::UnknownOperation { .. }));
    }

    #[test]
    fn load_is_not_cdc() {
        assert!(!Operation::Load.is_cdc());
        for op in Operation::CDC {
            assert!(op.is_cdc());
        }
    }

    #[test]
    fn metadata_parses_source_and_table() {
        let meta = EventMetadata::parse(r#"{"source":"oms","table":"offenders"}"#).unwrap();
        assert_eq!(meta.source, "oms");
        assert_eq!(meta.table, "offenders");
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        assert!(EventMetadata::parse("not json").is_err());
    }
}
