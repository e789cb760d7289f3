//! Shared task progress tracker fed by the dispatcher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use huddle_core::{Message, TaskProgress, TaskProgressRecord, TaskProgressRegistry};

use crate::dispatcher::{Dispatcher, HandlerId};

/// Cloneable handle over one [`TaskProgressRegistry`].
///
/// Lookups return owned records so no lock is held by callers.
#[derive(Debug, Clone, Default)]
pub struct TaskProgressTracker {
    registry: Arc<Mutex<TaskProgressRegistry>>,
}

impl TaskProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording every `task_progress` message published by `dispatcher`.
    pub fn attach(&self, dispatcher: &Dispatcher) -> HandlerId {
        let tracker = self.clone();
        dispatcher.on_message(move |message| {
            if let Message::TaskProgress(update) = message {
                tracker.record(update);
            }
        })
    }

    pub fn record(&self, update: &TaskProgress) -> TaskProgressRecord {
        let record = self.registry().apply(update, Utc::now()).clone();
        tracing::debug!(
            task_id = %record.task_id,
            progress = ?record.progress,
            status = ?record.status,
            "progress: updated"
        );
        record
    }

    pub fn get_task_progress(&self, task_id: &str) -> Option<TaskProgressRecord> {
        self.registry().get_task_progress(task_id).cloned()
    }

    /// Exact match, then first prefix match; see
    /// [`TaskProgressRegistry::get_current_task_progress`].
    pub fn get_current_task_progress(&self, expected_id: &str) -> Option<TaskProgressRecord> {
        self.registry().get_current_task_progress(expected_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<TaskProgressRecord> {
        self.registry().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    pub fn clear(&self) {
        self.registry().clear();
    }

    fn registry(&self) -> MutexGuard<'_, TaskProgressRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
