//! Error types for KyroAlert.
//!
//! All errors are strongly typed using thiserror. Registries and the ingest
//! pipeline return these without translation; the HTTP-facing status mapping
//! lives in [`AlertError::status_code`].

use thiserror::Error;

use crate::queue::QueueError;
use crate::schema::FieldType;
use crate::store::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Invalid mapping: {reason}")]
    InvalidMapping { reason: String },

    #[error("Invalid event data: {reason}")]
    InvalidPayload { field: String, reason: String },

    #[error("Field '{field}' is not declared by the event type")]
    UndeclaredField { field: String },

    #[error("Field '{field}' must be {expected}: {reason}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        reason: String,
    },

    #[error("Field '{field}' value {value} does not fit in {expected}")]
    OutOfRange {
        field: String,
        expected: FieldType,
        value: String,
    },

    #[error("Field '{field}' is not a valid geo_shape: {reason}")]
    InvalidGeoShape { field: String, reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid job template: {reason}")]
    InvalidJobTemplate { reason: String },

    #[error("Name '{name}' is reserved or malformed: {reason}")]
    InvalidName { name: String, reason: String },
}

impl ValidationError {
    pub(crate) fn mismatch(field: &str, expected: FieldType, reason: impl Into<String>) -> Self {
        Self::TypeMismatch {
            field: field.to_string(),
            expected,
            reason: reason.into(),
        }
    }
}

/// Kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    EventType,
    Event,
    Trigger,
    Alert,
    CronEntry,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EventType => "EventType",
            Self::Event => "Event",
            Self::Trigger => "Trigger",
            Self::Alert => "Alert",
            Self::CronEntry => "CronEntry",
        };
        f.write_str(s)
    }
}

/// Top-level error type for KyroAlert.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("EventType name already exists: {name}")]
    NameExists { name: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Invalid cron schedule '{expression}': {reason}")]
    BadSchedule { expression: String, reason: String },

    #[error("Store failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue failure: {0}")]
    Queue(#[from] QueueError),

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AlertError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: RecordKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates a forbidden error.
    #[must_use]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a forbidden error.
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Returns true if a collaborator (store/queue) failed.
    #[must_use]
    pub const fn is_collaborator(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Queue(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => !matches!(e, StorageError::SchemaViolation { .. }),
            Self::Queue(_) | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// HTTP status for the request-facing surface.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::NameExists { .. } | Self::BadSchedule { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Storage(StorageError::SchemaViolation { .. }) => 400,
            Self::Storage(_) | Self::Queue(_) | Self::Timeout { .. } | Self::Internal { .. } => {
                500
            }
        }
    }
}

/// Result type alias for KyroAlert operations.
pub type AlertResult<T> = Result<T, AlertError>;
