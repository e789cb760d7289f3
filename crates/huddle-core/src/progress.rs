//! Task progress registry and identifier reconciliation.
//!
//! Clients track work under the logical id they requested it with. The
//! server may publish progress under a derived id: the logical id with a
//! suffix appended (observed: `<id>_<timestamp>`). Lookups therefore try an
//! exact match first and fall back to a prefix match.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::TaskProgress;

/// Latest known progress for one server-side task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgressRecord {
    pub task_id: String,
    pub progress: Option<f64>,
    pub status: Option<String>,
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgressRecord {
    pub fn from_update(update: &TaskProgress, now: DateTime<Utc>) -> Self {
        Self {
            task_id: update.task_id.clone(),
            progress: update.progress,
            status: update.status.clone(),
            message: update.message.clone(),
            extra: update.extra.clone(),
            updated_at: now,
        }
    }
}

/// All progress records seen this session, keyed by server task id.
///
/// Keys iterate in first-insertion order; overwriting a record keeps its
/// position. Records are never evicted individually, only by [`clear`]
/// when the session ends.
///
/// [`clear`]: TaskProgressRegistry::clear
#[derive(Debug, Default, Clone)]
pub struct TaskProgressRegistry {
    records: IndexMap<String, TaskProgressRecord>,
}

impl TaskProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the record for `update.task_id`.
    pub fn apply(&mut self, update: &TaskProgress, now: DateTime<Utc>) -> &TaskProgressRecord {
        let record = TaskProgressRecord::from_update(update, now);
        let entry = self.records.entry(update.task_id.clone());
        match entry {
            indexmap::map::Entry::Occupied(mut occupied) => {
                occupied.insert(record);
                occupied.into_mut()
            }
            indexmap::map::Entry::Vacant(vacant) => vacant.insert(record),
        }
    }

    /// Exact lookup.
    pub fn get_task_progress(&self, task_id: &str) -> Option<&TaskProgressRecord> {
        self.records.get(task_id)
    }

    /// Tolerant lookup for a client-side logical id.
    ///
    /// 1. Exact match on `expected_id`.
    /// 2. Otherwise the first stored key, in insertion order, that starts
    ///    with `expected_id`.
    /// 3. Otherwise `None`.
    ///
    /// Step 2 is ambiguous when one tracked id is a prefix of another
    /// (`"t1"` vs `"t12_…"`): the earliest inserted key wins. That matches
    /// server behaviour today, where at most one in-flight task shares a
    /// logical-id prefix, and is kept as is.
    pub fn get_current_task_progress(&self, expected_id: &str) -> Option<&TaskProgressRecord> {
        if let Some(record) = self.records.get(expected_id) {
            return Some(record);
        }
        self.records
            .iter()
            .find(|(key, _)| key.starts_with(expected_id))
            .map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskProgressRecord> {
        self.records.values()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
