//! huddle-core: pure domain types for the real-time session core.
//! Message envelope decoding, task progress reconciliation, foreign-key
//! tables for notification enrichment and the reconnect backoff policy.
//! No async, no IO.

pub mod backoff;
pub mod error;
pub mod foreign_key;
pub mod message;
pub mod progress;
pub mod types;

pub use backoff::{BackoffPolicy, MIN_BACKOFF_MS};
pub use error::DecodeError;
pub use foreign_key::{EntityKind, FOREIGN_KEYS, ForeignKey, Lookup, derived_name_key, plan_lookups};
pub use message::{Message, Notification, TaskProgress, decode_frame};
pub use progress::{TaskProgressRecord, TaskProgressRegistry};
pub use types::{ConnectionState, Credential};
