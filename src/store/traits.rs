//! Content store contract.
//!
//! The engine keeps every record in a single document index partitioned by
//! type name. Event types register strict schemas for their partition;
//! internal record partitions are schemaless. Triggers live in the index as
//! standing percolation queries.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::query::Query;
use crate::schema::CompiledSchema;

/// Errors raised by a content store backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// The index has not been created (or was deleted).
    #[error("index does not exist")]
    IndexNotFound,

    /// The index already exists.
    #[error("index already exists")]
    IndexExists,

    /// A document carries a field its type's strict schema does not declare.
    #[error("document for '{type_name}' has undeclared field '{field}'")]
    SchemaViolation { type_name: String, field: String },

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub from: usize,
    pub size: usize,
}

impl Page {
    #[must_use]
    pub const fn new(from: usize, size: usize) -> Self {
        Self { from, size }
    }

    /// First `size` hits.
    #[must_use]
    pub const fn first(size: usize) -> Self {
        Self { from: 0, size }
    }

    /// Caps `size` at `max`.
    #[must_use]
    pub fn clamped(self, max: usize) -> Self {
        Self {
            from: self.from,
            size: self.size.min(max),
        }
    }
}

/// One stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub source: JsonValue,
}

/// A page of search results plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    pub total: usize,
    pub hits: Vec<Hit>,
}

impl SearchHits {
    /// Deserializes every hit's source.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<Vec<T>, StorageError> {
        self.hits
            .into_iter()
            .map(|hit| {
                serde_json::from_value(hit.source)
                    .map_err(|e| StorageError::Serialization(format!("document {}: {e}", hit.id)))
            })
            .collect()
    }

    /// Deserializes the page into records, keeping the total.
    pub fn into_paged<T: serde::de::DeserializeOwned>(self) -> Result<Paged<T>, StorageError> {
        let total = self.total;
        let items = self.decode()?;
        Ok(Paged { total, items })
    }
}

/// A decoded page of records plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub total: usize,
    pub items: Vec<T>,
}

/// Document index with typed partitions and a percolator.
///
/// Implementations must be safe for concurrent use. Single-document
/// operations are atomic; nothing spans documents.
pub trait ContentStore: Send + Sync {
    /// Creates the index. Fails with `IndexExists` if it is already there.
    fn create_index(&self) -> Result<(), StorageError>;

    /// Deletes the index and everything in it. Returns whether it existed.
    fn delete_index(&self) -> Result<bool, StorageError>;

    /// Returns whether the index exists.
    fn index_exists(&self) -> Result<bool, StorageError>;

    /// Registers a strict schema for a type partition.
    fn set_schema(&self, type_name: &str, schema: &CompiledSchema) -> Result<(), StorageError>;

    /// Removes a type partition's schema. Returns whether one was registered.
    fn drop_schema(&self, type_name: &str) -> Result<bool, StorageError>;

    /// Type names with a registered schema.
    fn type_names(&self) -> Result<Vec<String>, StorageError>;

    /// Inserts or replaces a document.
    fn put(&self, type_name: &str, id: &str, doc: JsonValue) -> Result<(), StorageError>;

    /// Fetches a document.
    fn get(&self, type_name: &str, id: &str) -> Result<Option<JsonValue>, StorageError>;

    /// Deletes a document. Returns whether it existed.
    fn delete(&self, type_name: &str, id: &str) -> Result<bool, StorageError>;

    /// Lists a partition.
    fn search_all(&self, type_name: &str, page: Page) -> Result<SearchHits, StorageError>;

    /// Lists documents of a partition whose `field` equals `value`.
    fn search_by_term(
        &self,
        type_name: &str,
        field: &str,
        value: &JsonValue,
        page: Page,
    ) -> Result<SearchHits, StorageError>;

    /// Registers (or replaces) a standing query restricted to `type_names`.
    ///
    /// Returns the percolation id, which is `id`.
    fn register_percolation_query(
        &self,
        id: &str,
        query: &Query,
        type_names: &[String],
    ) -> Result<String, StorageError>;

    /// Removes a standing query. Returns whether it existed.
    fn delete_percolation_query(&self, id: &str) -> Result<bool, StorageError>;

    /// Ids of every standing query for `type_name` that `doc` satisfies.
    fn percolate(&self, type_name: &str, doc: &JsonValue) -> Result<Vec<String>, StorageError>;
}
