//! Event records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{EventId, EventTypeId};
use crate::schema::{compile, CompiledSchema, FieldType, Mapping, SchemaNode};

/// A stored event.
///
/// Persisted as-is in its event type's partition; `data` is the payload the
/// type's mapping governs and the document percolation runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: EventId,
    pub event_type_id: EventTypeId,
    pub data: JsonValue,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_schedule: Option<String>,
}

impl Event {
    /// Returns true if this event repeats on a cron schedule.
    #[must_use]
    pub fn is_repeating(&self) -> bool {
        self.cron_schedule.is_some()
    }
}

/// An event as submitted, before id and timestamp are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub event_type_id: EventTypeId,
    #[serde(default = "empty_object")]
    pub data: JsonValue,
    #[serde(default)]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_schedule: Option<String>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl NewEvent {
    #[must_use]
    pub fn new(event_type_id: EventTypeId, data: JsonValue) -> Self {
        Self {
            event_type_id,
            data,
            created_by: String::new(),
            cron_schedule: None,
        }
    }

    #[must_use]
    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }

    /// Makes the event repeat on `expression`.
    #[must_use]
    pub fn repeating(mut self, expression: impl Into<String>) -> Self {
        self.cron_schedule = Some(expression.into());
        self
    }

    pub(crate) fn stamp(self) -> Event {
        Event {
            event_id: EventId::new(),
            event_type_id: self.event_type_id,
            data: self.data,
            created_by: self.created_by,
            created_on: Utc::now(),
            cron_schedule: self.cron_schedule,
        }
    }
}

/// Strict store schema for an event partition: the envelope fields plus the
/// compiled data mapping under `data`.
#[must_use]
pub fn envelope_schema(mapping: &Mapping) -> CompiledSchema {
    let field = |t| SchemaNode::Field { field_type: t };
    CompiledSchema::strict(BTreeMap::from([
        ("eventId".to_string(), field(FieldType::String)),
        ("eventTypeId".to_string(), field(FieldType::String)),
        ("data".to_string(), compile(mapping).into_object_node()),
        ("createdBy".to_string(), field(FieldType::String)),
        ("createdOn".to_string(), field(FieldType::Date)),
        ("cronSchedule".to_string(), field(FieldType::String)),
    ]))
}
