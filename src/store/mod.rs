//! Content store: the document index every registry persists into.

mod memory;
mod traits;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

pub use memory::InMemoryContentStore;
pub use traits::{ContentStore, Hit, Page, Paged, SearchHits, StorageError};

/// Schemaless partitions holding the engine's own records.
pub mod partition {
    pub const EVENT_TYPE: &str = "eventType";
    pub const TRIGGER: &str = "trigger";
    pub const ALERT: &str = "alert";
    pub const CRON_ENTRY: &str = "cronEntry";

    /// Every internal partition name.
    pub const ALL: [&str; 4] = [EVENT_TYPE, TRIGGER, ALERT, CRON_ENTRY];
}

pub(crate) fn to_doc<T: Serialize>(record: &T) -> Result<JsonValue, StorageError> {
    serde_json::to_value(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn from_doc<T: DeserializeOwned>(id: &str, doc: JsonValue) -> Result<T, StorageError> {
    serde_json::from_value(doc).map_err(|e| StorageError::Serialization(format!("document {id}: {e}")))
}
