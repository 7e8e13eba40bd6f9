//! Triggers: standing queries paired with job templates.

mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ValidationError;
use crate::id::{EventTypeId, TriggerId};
use crate::query::Query;

pub use registry::TriggerRegistry;

/// Store path of a trigger's applicable event type ids.
pub const CONDITION_EVENT_TYPE_IDS: &str = "condition.eventTypeIds";

/// When a trigger fires: the event types it applies to and the query their
/// data must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub event_type_ids: Vec<EventTypeId>,
    pub query: Query,
}

impl Condition {
    #[must_use]
    pub fn new(event_type_ids: Vec<EventTypeId>, query: Query) -> Self {
        Self {
            event_type_ids,
            query,
        }
    }

    /// Condition over a single event type.
    #[must_use]
    pub fn single(event_type_id: EventTypeId, query: Query) -> Self {
        Self::new(vec![event_type_id], query)
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type_ids.is_empty() {
            return Err(ValidationError::MissingField {
                field: CONDITION_EVENT_TYPE_IDS.to_string(),
            });
        }
        self.query.validate()
    }

    /// Returns true if the condition covers `event_type_id`.
    #[must_use]
    pub fn applies_to(&self, event_type_id: EventTypeId) -> bool {
        self.event_type_ids.contains(&event_type_id)
    }
}

/// A registered trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: TriggerId,
    pub title: String,
    pub condition: Condition,
    pub job: JsonValue,
    pub enabled: bool,
    /// Id of the standing query registered for this trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percolation_id: Option<String>,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
}

/// A trigger as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrigger {
    pub title: String,
    pub condition: Condition,
    pub job: JsonValue,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub created_by: String,
}

fn enabled_by_default() -> bool {
    true
}

impl NewTrigger {
    #[must_use]
    pub fn new(title: impl Into<String>, condition: Condition, job: JsonValue) -> Self {
        Self {
            title: title.into(),
            condition,
            job,
            enabled: true,
            created_by: String::new(),
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }
}

/// Partial update of a trigger. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JsonValue>,
}

impl TriggerUpdate {
    #[must_use]
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn condition(condition: Condition) -> Self {
        Self {
            condition: Some(condition),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_document_shape() {
        let type_id = EventTypeId::new();
        let trigger = Trigger {
            id: TriggerId::new(),
            title: "seventeen".to_string(),
            condition: Condition::single(type_id, Query::term("num", 17)),
            job: json!({"image": "alert"}),
            enabled: true,
            percolation_id: None,
            created_by: "ops".to_string(),
            created_on: Utc::now(),
        };
        let doc = serde_json::to_value(&trigger).unwrap();
        assert_eq!(doc["condition"]["eventTypeIds"], json!([type_id.to_string()]));
        assert_eq!(doc["condition"]["query"], json!({"term": {"num": 17}}));
        assert!(doc.get("percolationId").is_none());
        let back: Trigger = serde_json::from_value(doc).unwrap();
        assert_eq!(back, trigger);
    }

    #[test]
    fn new_trigger_defaults_to_enabled() {
        let raw = json!({
            "title": "t",
            "condition": {"eventTypeIds": [EventTypeId::new().to_string()], "query": {"match_all": {}}},
            "job": {}
        });
        let parsed: NewTrigger = serde_json::from_value(raw).unwrap();
        assert!(parsed.enabled);
        assert!(parsed.condition.validate().is_ok());
        assert!(Condition::new(vec![], Query::match_all()).validate().is_err());
    }
}
