//! Collaborator reads used to turn foreign keys into display names.

use async_trait::async_trait;
use huddle_core::EntityKind;
use serde::Deserialize;

use crate::error::LookupError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Meeting {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Task {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub name: String,
}

/// Read-only access to the entities a notification may reference.
#[async_trait]
pub trait EntityDirectory: Send + Sync + 'static {
    async fn fetch_meeting(&self, id: &str) -> Result<Meeting, LookupError>;
    async fn fetch_project(&self, id: &str) -> Result<Project, LookupError>;
    async fn fetch_task(&self, id: &str) -> Result<Task, LookupError>;
    async fn fetch_user(&self, id: &str) -> Result<User, LookupError>;
}

/// Fetch the entity behind `id` and return its display field.
///
/// A blank display value counts as a failure so callers keep showing the
/// raw id instead of an empty label.
pub async fn display_name(
    directory: &dyn EntityDirectory,
    kind: EntityKind,
    id: &str,
) -> Result<String, LookupError> {
    let name = match kind {
        EntityKind::Meeting => directory.fetch_meeting(id).await?.title,
        EntityKind::Project => directory.fetch_project(id).await?.name,
        EntityKind::Task => directory.fetch_task(id).await?.title,
        EntityKind::User => directory.fetch_user(id).await?.name,
    };
    if name.trim().is_empty() {
        return Err(LookupError::MissingField {
            kind,
            field: kind.display_field(),
        });
    }
    Ok(name)
}
