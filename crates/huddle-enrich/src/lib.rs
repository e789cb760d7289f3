//! Notification enrichment: resolves foreign-key ids in notification
//! payloads into display names via collaborator reads.

pub mod directory;
pub mod error;
pub mod resolver;
pub mod rest;

pub use directory::{EntityDirectory, Meeting, Project, Task, User, display_name};
pub use error::LookupError;
pub use resolver::{DEFAULT_LOOKUP_TIMEOUT, EnrichmentSnapshot, NotificationResolver, ResolverConfig};
pub use rest::RestDirectory;
