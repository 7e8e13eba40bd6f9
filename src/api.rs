//! Request-facing response envelopes.
//!
//! Transport-free shapes a thin HTTP layer serializes as-is.

use serde::{Deserialize, Serialize};

use crate::error::AlertError;
use crate::stats::StatsSnapshot;

/// Response to a create call: the generated id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdResponse<T> {
    pub id: T,
}

impl<T> IdResponse<T> {
    pub fn new(id: T) -> Self {
        Self { id }
    }
}

/// Error body with its HTTP status and the component it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
    pub origin: String,
}

impl ErrorResponse {
    /// Builds the body for `err` raised by `origin` (e.g. `"trigger"`).
    #[must_use]
    pub fn from_error(err: &AlertError, origin: impl Into<String>) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
            origin: origin.into(),
        }
    }
}

/// Admin stats body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub stats: StatsSnapshot,
}

impl From<StatsSnapshot> for StatsResponse {
    fn from(stats: StatsSnapshot) -> Self {
        Self { stats }
    }
}
