//! Error types for inbound frame decoding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame envelope has no string `type` field")]
    MissingType,

    #[error("invalid `{kind}` payload: {detail}")]
    InvalidData { kind: String, detail: String },
}
