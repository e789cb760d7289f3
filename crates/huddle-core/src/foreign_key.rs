//! Foreign-key table for notification enrichment.
//!
//! A notification carries ids only. Each known id field maps to the
//! collaborator that can resolve it and to the derived key its display name
//! is written under.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ─── Entity Kind ──────────────────────────────────────────────────

/// Which collaborator read resolves a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Meeting,
    Project,
    Task,
    User,
}

impl EntityKind {
    pub const ALL: [Self; 4] = [Self::Meeting, Self::Project, Self::Task, Self::User];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Project => "project",
            Self::Task => "task",
            Self::User => "user",
        }
    }

    /// Attribute of the fetched entity used as its display name.
    pub fn display_field(self) -> &'static str {
        match self {
            Self::Meeting | Self::Task => "title",
            Self::Project | Self::User => "name",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Foreign Keys ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub kind: EntityKind,
}

impl ForeignKey {
    pub fn name_key(&self) -> String {
        derived_name_key(self.field)
    }
}

/// Every payload field that triggers a lookup.
pub const FOREIGN_KEYS: [ForeignKey; 5] = [
    ForeignKey { field: "meeting_id", kind: EntityKind::Meeting },
    ForeignKey { field: "project_id", kind: EntityKind::Project },
    ForeignKey { field: "task_id", kind: EntityKind::Task },
    ForeignKey { field: "user_id", kind: EntityKind::User },
    ForeignKey { field: "assigned_by", kind: EntityKind::User },
];

/// Key the resolved display name is stored under.
///
/// A trailing `_id` becomes `_name` (`meeting_id` → `meeting_name`). Fields
/// without the suffix use a literal mapping (`assigned_by` →
/// `assigned_by_name`).
pub fn derived_name_key(field: &str) -> String {
    match field.strip_suffix("_id") {
        Some(stem) if !stem.is_empty() => format!("{stem}_name"),
        _ => format!("{field}_name"),
    }
}

/// One lookup the resolver has to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub field: &'static str,
    pub kind: EntityKind,
    pub id: String,
    pub name_key: String,
}

/// Lookups required to enrich `payload`.
///
/// Only foreign keys that are present with a usable id produce a lookup.
/// A field whose derived name is already in the payload (a pass-through
/// such as `added_by_name`, or a name the server filled in) is skipped so the
/// original value is never overwritten.
pub fn plan_lookups(payload: &Map<String, Value>) -> Vec<Lookup> {
    FOREIGN_KEYS
        .iter()
        .filter_map(|fk| {
            let id = payload.get(fk.field).and_then(identifier_from_value)?;
            let name_key = fk.name_key();
            if payload.contains_key(&name_key) {
                return None;
            }
            Some(Lookup {
                field: fk.field,
                kind: fk.kind,
                id,
                name_key,
            })
        })
        .collect()
}

/// Interpret a JSON value as an identifier: non-empty strings and numbers.
pub fn identifier_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
