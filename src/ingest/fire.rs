//! One firing: (trigger, event) → job dispatch + alert.

use std::sync::Arc;

use crate::alert::{Alert, AlertLog};
use crate::error::{AlertError, AlertResult};
use crate::event::Event;
use crate::id::TriggerId;
use crate::job::instantiate;
use crate::queue::JobQueue;
use crate::stats::{Counter, StatsCounter};
use crate::trigger::TriggerRegistry;

/// Collaborators every FireTask needs.
pub struct FireContext {
    pub triggers: Arc<TriggerRegistry>,
    pub alerts: Arc<AlertLog>,
    pub queue: Arc<dyn JobQueue>,
    pub stats: Arc<StatsCounter>,
    pub topic: String,
}

/// What a FireTask did.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    /// Job dispatched and alert written.
    Fired(Alert),
    /// Trigger is disabled; nothing happened.
    Disabled,
    /// Trigger does not cover the event's type; nothing happened.
    NotApplicable,
}

/// A matched (trigger, event) pair.
#[derive(Debug, Clone)]
pub struct FireTask {
    pub trigger_id: TriggerId,
    pub event: Arc<Event>,
}

impl FireTask {
    #[must_use]
    pub fn new(trigger_id: TriggerId, event: Arc<Event>) -> Self {
        Self { trigger_id, event }
    }

    /// Runs the firing. Job and alert ids are derived from the pair, so a
    /// rerun dispatches the same job key and rewrites the same alert.
    pub fn run(&self, ctx: &FireContext) -> AlertResult<FireOutcome> {
        let trigger = ctx.triggers.get(self.trigger_id)?;
        let event_id = self.event.event_id;

        if !trigger.enabled {
            tracing::debug!(trigger_id = %trigger.id, event_id = %event_id, "trigger disabled; skipped");
            return Ok(FireOutcome::Disabled);
        }
        if !trigger.condition.applies_to(self.event.event_type_id) {
            tracing::debug!(
                trigger_id = %trigger.id,
                event_id = %event_id,
                event_type_id = %self.event.event_type_id,
                "trigger does not cover event type; skipped"
            );
            return Ok(FireOutcome::NotApplicable);
        }

        let instance = instantiate(&trigger.job, &self.event.data);
        let payload = serde_json::to_string(&instance)
            .map_err(|e| AlertError::internal(format!("job serialization: {e}")))?;

        let alert = Alert::for_firing(trigger.id, event_id, "engine");
        ctx.queue
            .send(&ctx.topic, &alert.job_id.to_string(), &payload)?;
        ctx.stats.increment(Counter::TriggeredJobs);

        ctx.alerts.record(&alert)?;
        tracing::info!(
            trigger_id = %trigger.id,
            event_id = %event_id,
            job_id = %alert.job_id,
            alert_id = %alert.id,
            "trigger fired"
        );
        Ok(FireOutcome::Fired(alert))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A fire context over an in-memory store.

    use std::sync::Arc;

    use serde_json::json;

    use super::FireContext;
    use crate::alert::AlertLog;
    use crate::event_type::{EventType, EventTypeRegistry};
    use crate::query::Query;
    use crate::queue::InMemoryJobQueue;
    use crate::schema::{FieldType, Mapping};
    use crate::stats::StatsCounter;
    use crate::store::InMemoryContentStore;
    use crate::trigger::{Condition, NewTrigger, Trigger, TriggerRegistry};

    pub(crate) struct Fixture {
        pub store: Arc<InMemoryContentStore>,
        pub event_types: Arc<EventTypeRegistry>,
        pub queue: Arc<InMemoryJobQueue>,
        pub ctx: Arc<FireContext>,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let store = Arc::new(InMemoryContentStore::open());
            let stats = Arc::new(StatsCounter::new());
            let event_types = Arc::new(EventTypeRegistry::new(store.clone(), stats.clone()));
            let triggers = Arc::new(TriggerRegistry::new(
                store.clone(),
                event_types.clone(),
                stats.clone(),
            ));
            let alerts = Arc::new(AlertLog::new(store.clone(), stats.clone()));
            let queue = Arc::new(InMemoryJobQueue::new());
            let ctx = Arc::new(FireContext {
                triggers,
                alerts,
                queue: queue.clone(),
                stats,
                topic: "jobs".to_string(),
            });
            Self {
                store,
                event_types,
                queue,
                ctx,
            }
        }

        pub(crate) fn num_type(&self, name: &str) -> EventType {
            self.event_types
                .create(name, Mapping::new().field("num", FieldType::Integer), "ops")
                .unwrap()
        }

        /// A trigger on `num == 17` for `event_type`.
        pub(crate) fn seventeen(&self, event_type: &EventType, title: &str) -> Trigger {
            self.ctx
                .triggers
                .create(NewTrigger::new(
                    title,
                    Condition::single(event_type.id, Query::term("num", 17)),
                    json!({"image": "notify", "args": ["$num"]}),
                ))
                .unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::Fixture;
    use super::*;
    use crate::event::NewEvent;
    use crate::store::Page;
    use crate::trigger::TriggerUpdate;

    fn event(event_type: &crate::event_type::EventType, num: i64) -> Arc<Event> {
        Arc::new(NewEvent::new(event_type.id, json!({ "num": num })).stamp())
    }

    #[test]
    fn fired_task_dispatches_job_and_records_alert() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        let trigger = f.seventeen(&et, "seventeen");
        let event = event(&et, 17);

        let outcome = FireTask::new(trigger.id, Arc::clone(&event)).run(&f.ctx).unwrap();
        let FireOutcome::Fired(alert) = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(alert.trigger_id, trigger.id);
        assert_eq!(alert.event_id, event.event_id);

        let messages = f.queue.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "jobs");
        assert_eq!(messages[0].key, alert.job_id.to_string());
        assert_eq!(messages[0].payload_json().unwrap(), instantiate(&trigger.job, &event.data));
        assert_eq!(f.ctx.alerts.get(alert.id).unwrap(), alert);
        assert_eq!(f.ctx.stats.snapshot().num_triggered_jobs, 1);
    }

    #[test]
    fn event_of_an_uncovered_type_is_not_applicable() {
        let f = Fixture::new();
        let covered = f.num_type("covered");
        let other = f.num_type("other");
        let trigger = f.seventeen(&covered, "seventeen");

        let outcome = FireTask::new(trigger.id, event(&other, 17)).run(&f.ctx).unwrap();
        assert_eq!(outcome, FireOutcome::NotApplicable);
        assert!(f.queue.is_empty());
        assert_eq!(f.ctx.alerts.list(Page::first(10)).unwrap().total, 0);
        assert_eq!(f.ctx.stats.snapshot().num_triggered_jobs, 0);
    }

    #[test]
    fn disabled_trigger_is_skipped() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        let trigger = f.seventeen(&et, "seventeen");
        f.ctx
            .triggers
            .update(trigger.id, TriggerUpdate::enabled(false))
            .unwrap();

        let outcome = FireTask::new(trigger.id, event(&et, 17)).run(&f.ctx).unwrap();
        assert_eq!(outcome, FireOutcome::Disabled);
        assert!(f.queue.is_empty());
    }

    #[test]
    fn missing_trigger_fails_without_side_effects() {
        let f = Fixture::new();
        let et = f.num_type("ET");

        let err = FireTask::new(TriggerId::new(), event(&et, 17))
            .run(&f.ctx)
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(f.queue.is_empty());
        assert_eq!(f.ctx.alerts.list(Page::first(10)).unwrap().total, 0);
    }
}
