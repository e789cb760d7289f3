//! Inbound frame envelope and its decoded form.
//!
//! Every frame is a JSON object `{ "type": string, "data": <payload> }`.
//! Known tags decode into typed variants; anything else is preserved
//! verbatim in [`Message::Other`] so new server message types pass through
//! to generic subscribers untouched.

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::foreign_key::identifier_from_value;

pub const TASK_PROGRESS: &str = "task_progress";
pub const NOTIFICATION: &str = "notification";

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    TaskProgress(TaskProgress),
    Notification(Notification),
    Other { kind: String, data: Value },
}

impl Message {
    /// Wire tag of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::TaskProgress(_) => TASK_PROGRESS,
            Self::Notification(_) => NOTIFICATION,
            Self::Other { kind, .. } => kind,
        }
    }

    /// Re-encode as a `{type, data}` envelope.
    pub fn to_envelope(&self) -> Value {
        let data = match self {
            Self::TaskProgress(p) => Value::Object(p.to_map()),
            Self::Notification(n) => Value::Object(n.payload.clone()),
            Self::Other { data, .. } => data.clone(),
        };
        serde_json::json!({ "type": self.kind(), "data": data })
    }
}

/// Progress update for one background task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    /// Identifier as published by the server (may carry a suffix).
    pub task_id: String,
    /// Percent complete, accepted from `progress` or `percent`.
    pub progress: Option<f64>,
    pub status: Option<String>,
    pub message: Option<String>,
    /// Every other server-supplied field.
    pub extra: Map<String, Value>,
}

impl TaskProgress {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            progress: None,
            status: None,
            message: None,
            extra: Map::new(),
        }
    }

    fn from_data(data: Value) -> Result<Self, DecodeError> {
        let invalid = |detail: &str| DecodeError::InvalidData {
            kind: TASK_PROGRESS.to_string(),
            detail: detail.to_string(),
        };

        let Value::Object(mut fields) = data else {
            return Err(invalid("data is not an object"));
        };

        let task_id = fields
            .remove("task_id")
            .as_ref()
            .and_then(identifier_from_value)
            .ok_or_else(|| invalid("missing task_id"))?;

        let progress = match fields.remove("progress").or_else(|| fields.remove("percent")) {
            None | Some(Value::Null) => None,
            Some(v) => Some(as_percent(&v).ok_or_else(|| invalid("progress is not numeric"))?),
        };
        let status = take_string(&mut fields, "status");
        let message = take_string(&mut fields, "message");

        Ok(Self {
            task_id,
            progress,
            status,
            message,
            extra: fields,
        })
    }

    fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("task_id".into(), Value::String(self.task_id.clone()));
        if let Some(p) = self.progress {
            map.insert("progress".into(), Value::from(p));
        }
        if let Some(s) = &self.status {
            map.insert("status".into(), Value::String(s.clone()));
        }
        if let Some(m) = &self.message {
            map.insert("message".into(), Value::String(m.clone()));
        }
        map
    }
}

/// Notification payload: terse, foreign-key-laden, kept exactly as received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub payload: Map<String, Value>,
}

impl Notification {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self { payload }
    }

    pub fn id(&self) -> Option<String> {
        self.payload.get("id").and_then(identifier_from_value)
    }
}

/// Decode one text frame into a [`Message`].
///
/// Fails on non-JSON input, a missing or non-string `type`, or a known type
/// whose `data` does not have the expected shape. Callers drop failed frames.
pub fn decode_frame(raw: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut envelope) = value else {
        return Err(DecodeError::MissingType);
    };

    let kind = match envelope.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => return Err(DecodeError::MissingType),
    };
    let data = envelope.remove("data").unwrap_or(Value::Null);

    match kind.as_str() {
        TASK_PROGRESS => TaskProgress::from_data(data).map(Message::TaskProgress),
        NOTIFICATION => match data {
            Value::Object(payload) => Ok(Message::Notification(Notification::new(payload))),
            Value::Null => Ok(Message::Notification(Notification::default())),
            _ => Err(DecodeError::InvalidData {
                kind,
                detail: "data is not an object".to_string(),
            }),
        },
        _ => Ok(Message::Other { kind, data }),
    }
}

fn as_percent(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
