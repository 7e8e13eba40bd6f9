//! Trigger lifecycle and its 1:1 standing query.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::error::{AlertError, AlertResult, RecordKind, ValidationError};
use crate::event_type::{EventType, EventTypeRegistry};
use crate::id::{EventTypeId, TriggerId};
use crate::job::validate_template;
use crate::stats::{Counter, StatsCounter};
use crate::store::{from_doc, partition, to_doc, ContentStore, Page, Paged};
use crate::trigger::{Condition, NewTrigger, Trigger, TriggerUpdate, CONDITION_EVENT_TYPE_IDS};

/// Owns trigger records and the standing queries registered for them.
pub struct TriggerRegistry {
    store: Arc<dyn ContentStore>,
    event_types: Arc<EventTypeRegistry>,
    stats: Arc<StatsCounter>,
    // Serializes read-modify-write on trigger records.
    write_lock: Mutex<()>,
}

impl TriggerRegistry {
    pub fn new(
        store: Arc<dyn ContentStore>,
        event_types: Arc<EventTypeRegistry>,
        stats: Arc<StatsCounter>,
    ) -> Self {
        Self {
            store,
            event_types,
            stats,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> AlertResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| AlertError::internal("trigger write lock poisoned"))
    }

    /// Resolves the condition's event types and checks the query only
    /// references fields one of them declares. Returns the type names.
    fn resolve(&self, condition: &Condition) -> AlertResult<Vec<String>> {
        condition.validate()?;

        let mut types: Vec<EventType> = Vec::with_capacity(condition.event_type_ids.len());
        for id in &condition.event_type_ids {
            if types.iter().all(|t| t.id != *id) {
                types.push(self.event_types.get(*id)?);
            }
        }

        if let Some(field) = condition
            .query
            .fields()
            .into_iter()
            .find(|f| !types.iter().any(|t| t.mapping.declares(f)))
        {
            return Err(ValidationError::InvalidQuery {
                reason: format!("field '{field}' is not declared by any of the trigger's event types"),
            }
            .into());
        }

        Ok(types.into_iter().map(|t| t.name).collect())
    }

    fn persist(&self, trigger: &Trigger) -> AlertResult<()> {
        let doc = to_doc(trigger)?;
        self.store
            .put(partition::TRIGGER, &trigger.id.to_string(), doc)?;
        Ok(())
    }

    /// Registers a trigger.
    ///
    /// The standing query is registered first; if the record cannot be
    /// written afterwards the standing query is removed again.
    pub fn create(&self, new: NewTrigger) -> AlertResult<Trigger> {
        validate_template(&new.job)?;
        let type_names = self.resolve(&new.condition)?;

        let id = TriggerId::new();
        let percolation_id = self.store.register_percolation_query(
            &id.to_string(),
            &new.condition.query,
            &type_names,
        )?;

        let trigger = Trigger {
            id,
            title: new.title,
            condition: new.condition,
            job: new.job,
            enabled: new.enabled,
            percolation_id: Some(percolation_id.clone()),
            created_by: new.created_by,
            created_on: Utc::now(),
        };

        if let Err(err) = self.persist(&trigger) {
            match self.store.delete_percolation_query(&percolation_id) {
                Ok(_) => tracing::debug!(trigger_id = %id, "standing query rolled back"),
                Err(rollback) => tracing::warn!(
                    trigger_id = %id,
                    error = %rollback,
                    "failed to roll back standing query after trigger persist failure"
                ),
            }
            return Err(err);
        }

        self.stats.increment(Counter::Triggers);
        tracing::info!(trigger_id = %id, types = ?type_names, enabled = trigger.enabled, "trigger created");
        Ok(trigger)
    }

    pub fn find(&self, id: TriggerId) -> AlertResult<Option<Trigger>> {
        let key = id.to_string();
        match self.store.get(partition::TRIGGER, &key)? {
            Some(doc) => Ok(Some(from_doc(&key, doc)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: TriggerId) -> AlertResult<Trigger> {
        self.find(id)?
            .ok_or_else(|| AlertError::not_found(RecordKind::Trigger, id))
    }

    pub fn list(&self, page: Page) -> AlertResult<Paged<Trigger>> {
        Ok(self.store.search_all(partition::TRIGGER, page)?.into_paged()?)
    }

    /// Triggers whose condition covers `event_type_id`.
    pub fn list_by_event_type(&self, event_type_id: EventTypeId, page: Page) -> AlertResult<Paged<Trigger>> {
        Ok(self
            .store
            .search_by_term(
                partition::TRIGGER,
                CONDITION_EVENT_TYPE_IDS,
                &JsonValue::from(event_type_id.to_string()),
                page,
            )?
            .into_paged()?)
    }

    /// Applies a partial update.
    ///
    /// A changed condition replaces the standing query; if the record write
    /// then fails, the previous query is restored.
    pub fn update(&self, id: TriggerId, update: TriggerUpdate) -> AlertResult<Trigger> {
        let _guard = self.lock()?;
        let current = self.get(id)?;
        let mut next = current.clone();

        if let Some(title) = update.title {
            next.title = title;
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(job) = update.job {
            validate_template(&job)?;
            next.job = job;
        }

        let condition_changed = update
            .condition
            .as_ref()
            .is_some_and(|c| *c != current.condition);
        if let Some(condition) = update.condition.filter(|_| condition_changed) {
            let type_names = self.resolve(&condition)?;
            let percolation_id = self.store.register_percolation_query(
                &id.to_string(),
                &condition.query,
                &type_names,
            )?;
            next.condition = condition;
            next.percolation_id = Some(percolation_id);
        }

        if let Err(err) = self.persist(&next) {
            if condition_changed {
                self.restore_standing_query(&current);
            }
            return Err(err);
        }

        tracing::info!(
            trigger_id = %id,
            enabled = next.enabled,
            condition_changed,
            "trigger updated"
        );
        Ok(next)
    }

    fn restore_standing_query(&self, trigger: &Trigger) {
        let restored = self.resolve(&trigger.condition).and_then(|names| {
            self.store
                .register_percolation_query(&trigger.id.to_string(), &trigger.condition.query, &names)
                .map_err(AlertError::from)
        });
        if let Err(err) = restored {
            tracing::warn!(
                trigger_id = %trigger.id,
                error = %err,
                "failed to restore previous standing query after trigger update failure"
            );
        }
    }

    /// Deletes a trigger and its standing query.
    ///
    /// The record is kept if the standing query cannot be removed.
    pub fn delete(&self, id: TriggerId) -> AlertResult<()> {
        let _guard = self.lock()?;
        let trigger = self.get(id)?;
        let percolation_id = trigger
            .percolation_id
            .clone()
            .unwrap_or_else(|| id.to_string());

        if !self.store.delete_percolation_query(&percolation_id)? {
            tracing::warn!(trigger_id = %id, "trigger had no standing query");
        }
        self.store.delete(partition::TRIGGER, &id.to_string())?;
        tracing::info!(trigger_id = %id, "trigger deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use crate::schema::{FieldType, Mapping};
    use crate::store::testing::FlakyStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<FlakyStore>,
        event_types: Arc<EventTypeRegistry>,
        triggers: TriggerRegistry,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore::open());
        let stats = Arc::new(StatsCounter::new());
        let event_types = Arc::new(EventTypeRegistry::new(store.clone(), stats.clone()));
        let triggers = TriggerRegistry::new(store.clone(), event_types.clone(), stats);
        Fixture {
            store,
            event_types,
            triggers,
        }
    }

    fn num_type(f: &Fixture, name: &str) -> EventTypeId {
        f.event_types
            .create(name, Mapping::new().field("num", FieldType::Integer), "ops")
            .unwrap()
            .id
    }

    fn seventeen(type_id: EventTypeId) -> NewTrigger {
        NewTrigger::new(
            "seventeen",
            Condition::single(type_id, Query::term("num", 17)),
            json!({"image": "notify", "args": ["$num"]}),
        )
    }

    #[test]
    fn create_registers_standing_query() {
        let f = fixture();
        let et = num_type(&f, "ET");
        let trigger = f.triggers.create(seventeen(et)).unwrap();

        assert_eq!(trigger.percolation_id, Some(trigger.id.to_string()));
        assert_eq!(f.triggers.get(trigger.id).unwrap(), trigger);
        assert_eq!(
            f.store.percolate("ET", &json!({"num": 17})).unwrap(),
            vec![trigger.id.to_string()]
        );
        assert_eq!(f.triggers.list_by_event_type(et, Page::first(10)).unwrap().total, 1);
    }

    #[test]
    fn create_rejects_bad_input() {
        let f = fixture();
        let et = num_type(&f, "ET");

        let unknown_type = seventeen(EventTypeId::new());
        assert!(f.triggers.create(unknown_type).unwrap_err().is_not_found());

        let undeclared = NewTrigger::new(
            "t",
            Condition::single(et, Query::term("other", 1)),
            json!({}),
        );
        assert!(f.triggers.create(undeclared).unwrap_err().is_validation());

        let bad_job = NewTrigger::new("t", Condition::single(et, Query::match_all()), json!("run"));
        assert!(f.triggers.create(bad_job).unwrap_err().is_validation());

        let no_types = NewTrigger::new("t", Condition::new(vec![], Query::match_all()), json!({}));
        assert!(f.triggers.create(no_types).unwrap_err().is_validation());

        assert_eq!(f.store.inner.percolator_count().unwrap(), 0);
    }

    #[test]
    fn failed_persist_rolls_back_standing_query() {
        let f = fixture();
        let et = num_type(&f, "ET");
        f.store.fail_puts(partition::TRIGGER);

        assert!(f.triggers.create(seventeen(et)).is_err());
        assert_eq!(f.store.inner.percolator_count().unwrap(), 0);
        assert_eq!(f.triggers.list(Page::first(10)).unwrap().total, 0);
    }

    #[test]
    fn update_replaces_query_and_restores_on_failure() {
        let f = fixture();
        let et = num_type(&f, "ET");
        let trigger = f.triggers.create(seventeen(et)).unwrap();

        let updated = f
            .triggers
            .update(trigger.id, TriggerUpdate::condition(Condition::single(et, Query::term("num", 18))))
            .unwrap();
        assert_eq!(updated.condition.query, Query::term("num", 18));
        assert!(f.store.percolate("ET", &json!({"num": 17})).unwrap().is_empty());
        assert_eq!(f.store.percolate("ET", &json!({"num": 18})).unwrap().len(), 1);

        f.store.fail_puts(partition::TRIGGER);
        let attempt = f
            .triggers
            .update(trigger.id, TriggerUpdate::condition(Condition::single(et, Query::term("num", 19))));
        assert!(attempt.is_err());
        assert_eq!(f.store.percolate("ET", &json!({"num": 18})).unwrap().len(), 1);
        assert!(f.store.percolate("ET", &json!({"num": 19})).unwrap().is_empty());
        f.store.heal();

        let disabled = f.triggers.update(trigger.id, TriggerUpdate::enabled(false)).unwrap();
        assert!(!disabled.enabled);
        assert!(!f.triggers.get(trigger.id).unwrap().enabled);
    }

    #[test]
    fn delete_removes_record_and_standing_query() {
        let f = fixture();
        let et = num_type(&f, "ET");
        let trigger = f.triggers.create(seventeen(et)).unwrap();

        f.store.fail_percolator_deletes();
        assert!(f.triggers.delete(trigger.id).is_err());
        assert!(f.triggers.get(trigger.id).is_ok());
        f.store.heal();

        f.triggers.delete(trigger.id).unwrap();
        assert!(f.triggers.get(trigger.id).unwrap_err().is_not_found());
        assert!(f.store.percolate("ET", &json!({"num": 17})).unwrap().is_empty());
        assert!(f.triggers.delete(trigger.id).unwrap_err().is_not_found());
    }

    #[test]
    fn event_type_in_use_cannot_be_deleted() {
        let f = fixture();
        let et = num_type(&f, "ET");
        let trigger = f.triggers.create(seventeen(et)).unwrap();
        assert!(f.event_types.delete(et).unwrap_err().is_forbidden());
        f.triggers.delete(trigger.id).unwrap();
        f.event_types.delete(et).unwrap();
    }
}
