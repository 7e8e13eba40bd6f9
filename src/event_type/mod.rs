//! Event types: named mappings governing event payloads.

mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::EventTypeId;
use crate::schema::{FieldType, Mapping};
use crate::store::partition;

pub use registry::EventTypeRegistry;

/// Event type for file/batch ingestion notifications.
pub const INGEST: &str = "ingest";
/// Event type emitted when a dispatched job finishes.
pub const EXECUTION_COMPLETE: &str = "executionComplete";

/// Names of the built-in event types. These cannot be deleted.
pub const SYSTEM_EVENT_TYPES: [&str; 2] = [INGEST, EXECUTION_COMPLETE];

/// A registered event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventType {
    pub id: EventTypeId,
    pub name: String,
    pub mapping: Mapping,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
}

impl EventType {
    /// Returns true for the built-in types.
    #[must_use]
    pub fn is_system(&self) -> bool {
        is_system_name(&self.name)
    }
}

#[must_use]
pub fn is_system_name(name: &str) -> bool {
    SYSTEM_EVENT_TYPES.contains(&name)
}

/// Mapping of a built-in type.
#[must_use]
pub fn system_mapping(name: &str) -> Option<Mapping> {
    match name {
        INGEST => Some(
            Mapping::new()
                .field("source", FieldType::String)
                .field("path", FieldType::String)
                .field("size", FieldType::Long)
                .field("receivedOn", FieldType::Date),
        ),
        EXECUTION_COMPLETE => Some(
            Mapping::new()
                .field("jobId", FieldType::String)
                .field("triggerId", FieldType::String)
                .field("status", FieldType::String)
                .field("finishedOn", FieldType::Date),
        ),
        _ => None,
    }
}

/// Checks an event type name.
///
/// The name doubles as the store partition, so it must not collide with the
/// engine's own record partitions.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    if name.starts_with('_') {
        return Err(invalid("must not start with '_'"));
    }
    if partition::ALL.contains(&name) {
        return Err(invalid("is reserved for internal records"));
    }
    Ok(())
}
