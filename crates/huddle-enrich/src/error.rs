//! Error types for collaborator lookups.

use huddle_core::EntityKind;
use thiserror::Error;

/// Failure of a single entity lookup. Cloneable so it can be carried in
/// published enrichment snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("invalid collaborator url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("{kind} {id} lookup timed out after {after_ms}ms")]
    Timeout {
        kind: EntityKind,
        id: String,
        after_ms: u64,
    },

    #[error("{kind} has no usable `{field}`")]
    MissingField {
        kind: EntityKind,
        field: &'static str,
    },
}
