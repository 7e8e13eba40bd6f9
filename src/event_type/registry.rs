//! Event type lifecycle.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::error::{AlertError, AlertResult, RecordKind};
use crate::event::envelope_schema;
use crate::event_type::{system_mapping, validate_name, EventType, SYSTEM_EVENT_TYPES};
use crate::id::EventTypeId;
use crate::schema::Mapping;
use crate::stats::{Counter, StatsCounter};
use crate::store::{from_doc, partition, to_doc, ContentStore, Page, Paged};
use crate::trigger::CONDITION_EVENT_TYPE_IDS;

/// Owns event type records and the strict schemas registered for them.
pub struct EventTypeRegistry {
    store: Arc<dyn ContentStore>,
    stats: Arc<StatsCounter>,
    // Serializes the uniqueness check with the insert.
    create_lock: Mutex<()>,
}

impl EventTypeRegistry {
    pub fn new(store: Arc<dyn ContentStore>, stats: Arc<StatsCounter>) -> Self {
        Self {
            store,
            stats,
            create_lock: Mutex::new(()),
        }
    }

    /// Registers a new event type.
    ///
    /// The schema is registered with the store before the record is written;
    /// if the write fails the schema is dropped again.
    pub fn create(&self, name: &str, mapping: Mapping, created_by: &str) -> AlertResult<EventType> {
        validate_name(name)?;
        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| AlertError::internal("event type create lock poisoned"))?;

        if self.find_by_name(name)?.is_some()
            || self.store.type_names()?.iter().any(|n| n == name)
        {
            return Err(AlertError::NameExists {
                name: name.to_string(),
            });
        }

        let event_type = EventType {
            id: EventTypeId::new(),
            name: name.to_string(),
            mapping,
            created_by: created_by.to_string(),
            created_on: Utc::now(),
        };

        self.store
            .set_schema(name, &envelope_schema(&event_type.mapping))?;

        let persisted = to_doc(&event_type).and_then(|doc| {
            self.store
                .put(partition::EVENT_TYPE, &event_type.id.to_string(), doc)
        });
        if let Err(err) = persisted {
            if let Err(drop_err) = self.store.drop_schema(name) {
                tracing::warn!(
                    event_type = name,
                    error = %drop_err,
                    "failed to drop schema after event type persist failure"
                );
            }
            return Err(err.into());
        }

        self.stats.increment(Counter::EventTypes);
        tracing::info!(event_type_id = %event_type.id, name, "event type created");
        Ok(event_type)
    }

    /// Creates each built-in type that does not exist yet.
    pub fn ensure_system_types(&self) -> AlertResult<Vec<EventType>> {
        let mut created = Vec::new();
        for name in SYSTEM_EVENT_TYPES {
            if self.find_by_name(name)?.is_some() {
                continue;
            }
            let mapping = system_mapping(name)
                .ok_or_else(|| AlertError::internal(format!("no mapping for system type '{name}'")))?;
            created.push(self.create(name, mapping, "system")?);
        }
        Ok(created)
    }

    pub fn find(&self, id: EventTypeId) -> AlertResult<Option<EventType>> {
        let key = id.to_string();
        match self.store.get(partition::EVENT_TYPE, &key)? {
            Some(doc) => Ok(Some(from_doc(&key, doc)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: EventTypeId) -> AlertResult<EventType> {
        self.find(id)?
            .ok_or_else(|| AlertError::not_found(RecordKind::EventType, id))
    }

    pub fn find_by_name(&self, name: &str) -> AlertResult<Option<EventType>> {
        let hits = self.store.search_by_term(
            partition::EVENT_TYPE,
            "name",
            &JsonValue::from(name),
            Page::first(1),
        )?;
        Ok(hits.decode()?.into_iter().next())
    }

    pub fn get_by_name(&self, name: &str) -> AlertResult<EventType> {
        self.find_by_name(name)?
            .ok_or_else(|| AlertError::not_found(RecordKind::EventType, name))
    }

    pub fn list(&self, page: Page) -> AlertResult<Paged<EventType>> {
        Ok(self
            .store
            .search_all(partition::EVENT_TYPE, page)?
            .into_paged()?)
    }

    /// Deletes an event type.
    ///
    /// Forbidden for system types, types referenced by a trigger and types
    /// that still have events.
    pub fn delete(&self, id: EventTypeId) -> AlertResult<()> {
        let event_type = self.get(id)?;
        if event_type.is_system() {
            return Err(AlertError::forbidden(format!(
                "'{}' is a system event type",
                event_type.name
            )));
        }

        let referencing = self.store.search_by_term(
            partition::TRIGGER,
            CONDITION_EVENT_TYPE_IDS,
            &JsonValue::from(id.to_string()),
            Page::first(0),
        )?;
        if referencing.total > 0 {
            return Err(AlertError::forbidden(format!(
                "'{}' is referenced by {} trigger(s)",
                event_type.name, referencing.total
            )));
        }

        let events = self.store.search_all(&event_type.name, Page::first(0))?;
        if events.total > 0 {
            return Err(AlertError::forbidden(format!(
                "'{}' still has {} event(s)",
                event_type.name, events.total
            )));
        }

        self.store.delete(partition::EVENT_TYPE, &id.to_string())?;
        if let Err(err) = self.store.drop_schema(&event_type.name) {
            tracing::warn!(event_type_id = %id, error = %err, "failed to drop schema of deleted event type");
        }
        tracing::info!(event_type_id = %id, name = %event_type.name, "event type deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::store::testing::FlakyStore;
    use crate::store::InMemoryContentStore;
    use serde_json::json;

    fn registry() -> (Arc<InMemoryContentStore>, EventTypeRegistry) {
        let store = Arc::new(InMemoryContentStore::open());
        let registry = EventTypeRegistry::new(store.clone(), Arc::new(StatsCounter::new()));
        (store, registry)
    }

    fn num_mapping() -> Mapping {
        Mapping::new().field("num", FieldType::Integer)
    }

    #[test]
    fn create_registers_schema_and_record() {
        let (store, registry) = registry();
        let et = registry.create("ET", num_mapping(), "ops").unwrap();

        assert_eq!(store.type_names().unwrap(), vec!["ET".to_string()]);
        assert_eq!(registry.get(et.id).unwrap(), et);
        assert_eq!(registry.get_by_name("ET").unwrap().id, et.id);
        assert_eq!(registry.list(Page::first(10)).unwrap().total, 1);
    }

    #[test]
    fn duplicate_names_are_rejected_without_second_record() {
        let (_, registry) = registry();
        registry.create("ET", num_mapping(), "ops").unwrap();
        let err = registry.create("ET", num_mapping(), "ops").unwrap_err();
        assert!(matches!(err, AlertError::NameExists { .. }));
        assert_eq!(registry.list(Page::first(10)).unwrap().total, 1);
    }

    #[test]
    fn name_known_only_to_store_catalogue_is_rejected() {
        let (store, registry) = registry();
        store
            .set_schema("ET", &envelope_schema(&num_mapping()))
            .unwrap();
        assert!(matches!(
            registry.create("ET", num_mapping(), "ops"),
            Err(AlertError::NameExists { .. })
        ));
    }

    #[test]
    fn reserved_names_are_rejected() {
        let (_, registry) = registry();
        assert!(registry.create("trigger", num_mapping(), "ops").unwrap_err().is_validation());
    }

    #[test]
    fn failed_persist_drops_schema() {
        let store = Arc::new(FlakyStore::open());
        let registry = EventTypeRegistry::new(store.clone(), Arc::new(StatsCounter::new()));
        store.fail_puts(partition::EVENT_TYPE);

        assert!(registry.create("ET", num_mapping(), "ops").is_err());
        assert!(store.type_names().unwrap().is_empty());

        store.heal();
        registry.create("ET", num_mapping(), "ops").unwrap();
    }

    #[test]
    fn delete_guards() {
        let (store, registry) = registry();
        registry.ensure_system_types().unwrap();
        assert!(registry.ensure_system_types().unwrap().is_empty());
        let ingest = registry.get_by_name(crate::event_type::INGEST).unwrap();
        assert!(registry.delete(ingest.id).unwrap_err().is_forbidden());

        let et = registry.create("ET", num_mapping(), "ops").unwrap();
        store
            .put("ET", "e1", json!({"eventId": "e1", "data": {"num": 1}}))
            .unwrap();
        assert!(registry.delete(et.id).unwrap_err().is_forbidden());
        store.delete("ET", "e1").unwrap();

        store
            .put(
                partition::TRIGGER,
                "t1",
                json!({"condition": {"eventTypeIds": [et.id.to_string()]}}),
            )
            .unwrap();
        assert!(registry.delete(et.id).unwrap_err().is_forbidden());
        assert!(registry.get(et.id).is_ok());
        store.delete(partition::TRIGGER, "t1").unwrap();

        registry.delete(et.id).unwrap();
        assert!(registry.get(et.id).unwrap_err().is_not_found());
        assert!(!store.type_names().unwrap().contains(&"ET".to_string()));
        assert!(registry.delete(et.id).unwrap_err().is_not_found());
    }
}
