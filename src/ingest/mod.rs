//! Event ingestion: validate, persist, percolate, fan out.
//!
//! Every trigger id the percolator returns becomes a [`FireTask`] on the
//! bounded fire pool. Ingest waits for all of them before returning; tasks
//! of one event run concurrently and in no particular order.

mod fire;
mod pool;

use std::sync::Arc;

use crate::alert::Alert;
use crate::config::EngineConfig;
use crate::error::{AlertError, AlertResult, RecordKind};
use crate::event::{Event, NewEvent};
use crate::event_type::{EventType, EventTypeRegistry};
use crate::id::{EventId, EventTypeId, TriggerId};
use crate::schema::validate;
use crate::stats::{Counter, StatsCounter};
use crate::store::{from_doc, to_doc, ContentStore, Page, Paged};

pub use fire::{FireContext, FireOutcome, FireTask};
use pool::FirePool;

// Page size used when scanning every event type.
const TYPE_SCAN_PAGE: usize = 100;

/// A FireTask that did not complete.
#[derive(Debug)]
pub struct FireFailure {
    /// Matched standing query id (the trigger id).
    pub trigger_id: String,
    pub error: AlertError,
}

/// Everything one ingest did.
#[derive(Debug)]
pub struct IngestReport {
    pub event: Event,
    /// Alerts written, one per fired trigger.
    pub alerts: Vec<Alert>,
    /// Matched triggers that were disabled or did not cover the type.
    pub skipped: usize,
    pub failures: Vec<FireFailure>,
}

impl IngestReport {
    /// Returns true if every matched trigger completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Accepts events and drives their firings.
pub struct EventIngestor {
    store: Arc<dyn ContentStore>,
    event_types: Arc<EventTypeRegistry>,
    stats: Arc<StatsCounter>,
    pool: FirePool,
}

impl EventIngestor {
    pub fn new(
        store: Arc<dyn ContentStore>,
        event_types: Arc<EventTypeRegistry>,
        fire: Arc<FireContext>,
        config: &EngineConfig,
    ) -> AlertResult<Self> {
        let stats = Arc::clone(&fire.stats);
        let pool = FirePool::start(
            fire,
            config.fire_workers,
            config.fire_queue_capacity,
            config.fire_timeout,
        )?;
        Ok(Self {
            store,
            event_types,
            stats,
            pool,
        })
    }

    /// Ingests an event and returns it once every firing has finished.
    ///
    /// The event stays persisted even when a firing fails; the first
    /// failure is returned and sibling firings are not undone.
    pub fn ingest(&self, new: NewEvent) -> AlertResult<Event> {
        let report = self.ingest_with_report(new)?;
        match report.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(report.event),
        }
    }

    /// Ingests an event and reports every firing's outcome.
    pub fn ingest_with_report(&self, new: NewEvent) -> AlertResult<IngestReport> {
        let event_type = self.event_types.get(new.event_type_id)?;
        validate(&event_type.mapping, &new.data)?;

        let event = new.stamp();
        self.store.put(
            &event_type.name,
            &event.event_id.to_string(),
            to_doc(&event)?,
        )?;
        self.stats.increment(Counter::Events);
        tracing::debug!(event_id = %event.event_id, event_type = %event_type.name, "event stored");

        let matched = self.store.percolate(&event_type.name, &event.data)?;
        let report = self.fan_out(event, matched);
        tracing::info!(
            event_id = %report.event.event_id,
            event_type = %event_type.name,
            fired = report.alerts.len(),
            skipped = report.skipped,
            failed = report.failures.len(),
            "event ingested"
        );
        Ok(report)
    }

    fn fan_out(&self, event: Event, matched: Vec<String>) -> IngestReport {
        let shared = Arc::new(event);
        let mut failures = Vec::new();

        let handles: Vec<_> = matched
            .into_iter()
            .filter_map(|raw_id| {
                let submitted = raw_id
                    .parse::<TriggerId>()
                    .map_err(|e| AlertError::internal(format!("bad trigger id '{raw_id}' from percolator: {e}")))
                    .and_then(|trigger_id| self.pool.submit(FireTask::new(trigger_id, Arc::clone(&shared))));
                match submitted {
                    Ok(handle) => Some((raw_id, handle)),
                    Err(error) => {
                        failures.push(FireFailure {
                            trigger_id: raw_id,
                            error,
                        });
                        None
                    }
                }
            })
            .collect();

        let mut alerts = Vec::new();
        let mut skipped = 0;
        for (trigger_id, handle) in handles {
            match handle.join() {
                Ok(FireOutcome::Fired(alert)) => alerts.push(alert),
                Ok(FireOutcome::Disabled | FireOutcome::NotApplicable) => skipped += 1,
                Err(error) => {
                    tracing::warn!(trigger_id = %trigger_id, error = %error, "trigger firing failed");
                    failures.push(FireFailure { trigger_id, error });
                }
            }
        }

        let event = Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone());
        IngestReport {
            event,
            alerts,
            skipped,
            failures,
        }
    }

    /// Re-runs the firing of `trigger_id` for a stored event.
    pub fn refire(&self, trigger_id: TriggerId, event_id: EventId) -> AlertResult<FireOutcome> {
        let event = self.get(event_id)?;
        self.pool.run(FireTask::new(trigger_id, Arc::new(event)))
    }

    fn find_in(&self, event_type: &EventType, event_id: EventId) -> AlertResult<Option<Event>> {
        let key = event_id.to_string();
        match self.store.get(&event_type.name, &key)? {
            Some(doc) => Ok(Some(from_doc(&key, doc)?)),
            None => Ok(None),
        }
    }

    /// Looks an event up by id alone, scanning every event type.
    pub fn find(&self, event_id: EventId) -> AlertResult<Option<Event>> {
        let mut from = 0;
        loop {
            let page = self.event_types.list(Page::new(from, TYPE_SCAN_PAGE))?;
            for event_type in &page.items {
                if let Some(event) = self.find_in(event_type, event_id)? {
                    return Ok(Some(event));
                }
            }
            from += page.items.len();
            if page.items.is_empty() || from >= page.total {
                return Ok(None);
            }
        }
    }

    pub fn get(&self, event_id: EventId) -> AlertResult<Event> {
        self.find(event_id)?
            .ok_or_else(|| AlertError::not_found(RecordKind::Event, event_id))
    }

    /// Looks an event up within a known type.
    pub fn get_of_type(&self, event_type_id: EventTypeId, event_id: EventId) -> AlertResult<Event> {
        let event_type = self.event_types.get(event_type_id)?;
        self.find_in(&event_type, event_id)?
            .ok_or_else(|| AlertError::not_found(RecordKind::Event, event_id))
    }

    pub fn list(&self, event_type_id: EventTypeId, page: Page) -> AlertResult<Paged<Event>> {
        let event_type = self.event_types.get(event_type_id)?;
        Ok(self.store.search_all(&event_type.name, page)?.into_paged()?)
    }

    /// Deletes a stored event and returns it.
    ///
    /// Events of system types cannot be deleted.
    pub fn delete(&self, event_id: EventId) -> AlertResult<Event> {
        self.delete_with(event_id, |_| Ok(()))
    }

    /// Like [`delete`](Self::delete), but runs `before` once the event is
    /// known to be deletable. If `before` fails the event is kept.
    pub fn delete_with<F>(&self, event_id: EventId, before: F) -> AlertResult<Event>
    where
        F: FnOnce(&Event) -> AlertResult<()>,
    {
        let event = self.get(event_id)?;
        let event_type = self.event_types.get(event.event_type_id)?;
        if event_type.is_system() {
            return Err(AlertError::forbidden(format!(
                "events of system type '{}' cannot be deleted",
                event_type.name
            )));
        }
        before(&event)?;
        self.store.delete(&event_type.name, &event_id.to_string())?;
        tracing::info!(event_id = %event_id, event_type = %event_type.name, "event deleted");
        Ok(event)
    }

    /// Removes a just-ingested event regardless of its type. Alerts its
    /// firings wrote are kept.
    pub(crate) fn discard(&self, event: &Event) -> AlertResult<()> {
        let event_type = self.event_types.get(event.event_type_id)?;
        self.store.delete(&event_type.name, &event.event_id.to_string())?;
        tracing::info!(event_id = %event.event_id, event_type = %event_type.name, "event discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ingest::fire::testing::Fixture;
    use crate::store::partition;

    fn ingestor(f: &Fixture) -> EventIngestor {
        EventIngestor::new(
            f.store.clone(),
            Arc::clone(&f.event_types),
            Arc::clone(&f.ctx),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn missing_trigger_record_fails_only_its_own_firing() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        let healthy = f.seventeen(&et, "healthy");
        let orphaned = f.seventeen(&et, "orphaned");
        // Standing query stays registered; only the record goes.
        assert!(f.store.delete(partition::TRIGGER, &orphaned.id.to_string()).unwrap());

        let ingestor = ingestor(&f);
        let report = ingestor
            .ingest_with_report(NewEvent::new(et.id, json!({"num": 17})))
            .unwrap();

        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].trigger_id, healthy.id);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].trigger_id, orphaned.id.to_string());
        assert!(report.failures[0].error.is_not_found());
        assert!(!report.is_complete());
        assert_eq!(f.queue.len(), 1);
        assert_eq!(ingestor.get(report.event.event_id).unwrap(), report.event);

        let err = ingestor
            .ingest(NewEvent::new(et.id, json!({"num": 17})))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.queue.len(), 2);
    }

    #[test]
    fn unmatched_event_is_stored_without_firings() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        f.seventeen(&et, "seventeen");

        let ingestor = ingestor(&f);
        let report = ingestor
            .ingest_with_report(NewEvent::new(et.id, json!({"num": 3})))
            .unwrap();
        assert!(report.is_complete());
        assert!(report.alerts.is_empty());
        assert!(f.queue.is_empty());
        assert_eq!(ingestor.list(et.id, Page::first(10)).unwrap().total, 1);
    }

    #[test]
    fn discard_removes_events_of_system_types() {
        let f = Fixture::new();
        let system = f.event_types.ensure_system_types().unwrap();
        let ingest_type = system
            .into_iter()
            .find(|et| et.name == crate::event_type::INGEST)
            .unwrap();

        let ingestor = ingestor(&f);
        let event = ingestor
            .ingest(NewEvent::new(ingest_type.id, json!({"source": "s3"})))
            .unwrap();
        assert_eq!(ingestor.delete(event.event_id).unwrap_err().status_code(), 403);

        ingestor.discard(&event).unwrap();
        assert!(ingestor.get(event.event_id).unwrap_err().is_not_found());
    }
}
