//! The alerting engine facade.
//!
//! Wires the registries, the ingestor and the cron scheduler over one
//! content store, job queue and scheduler. This is the embedding entry
//! point; transports call it directly.

use std::sync::Arc;

use crate::alert::{Alert, AlertLog};
use crate::config::EngineConfig;
use crate::cron::{parse_schedule, CronEntry, CronScheduler, RecoveryReport, Scheduler};
use crate::error::AlertResult;
use crate::event::{Event, NewEvent};
use crate::event_type::{EventType, EventTypeRegistry};
use crate::id::{AlertId, EventId, EventTypeId, TriggerId};
use crate::ingest::{EventIngestor, FireContext, FireOutcome, IngestReport};
use crate::queue::JobQueue;
use crate::schema::Mapping;
use crate::stats::{StatsCounter, StatsSnapshot};
use crate::store::{ContentStore, Page, Paged};
use crate::trigger::{NewTrigger, Trigger, TriggerRegistry, TriggerUpdate};

/// Event-driven trigger engine.
pub struct AlertEngine {
    config: EngineConfig,
    store: Arc<dyn ContentStore>,
    stats: Arc<StatsCounter>,
    event_types: Arc<EventTypeRegistry>,
    triggers: Arc<TriggerRegistry>,
    alerts: Arc<AlertLog>,
    ingestor: Arc<EventIngestor>,
    cron: CronScheduler,
}

impl AlertEngine {
    /// Builds an engine without touching the store or the scheduler.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ContentStore>,
        queue: Arc<dyn JobQueue>,
        scheduler: Arc<dyn Scheduler>,
    ) -> AlertResult<Self> {
        let stats = Arc::new(StatsCounter::new());
        let event_types = Arc::new(EventTypeRegistry::new(Arc::clone(&store), Arc::clone(&stats)));
        let triggers = Arc::new(TriggerRegistry::new(
            Arc::clone(&store),
            Arc::clone(&event_types),
            Arc::clone(&stats),
        ));
        let alerts = Arc::new(AlertLog::new(Arc::clone(&store), Arc::clone(&stats)));

        let fire = Arc::new(FireContext {
            triggers: Arc::clone(&triggers),
            alerts: Arc::clone(&alerts),
            queue,
            stats: Arc::clone(&stats),
            topic: config.job_topic(),
        });
        let ingestor = Arc::new(EventIngestor::new(
            Arc::clone(&store),
            Arc::clone(&event_types),
            fire,
            &config,
        )?);
        let cron = CronScheduler::new(Arc::clone(&store), scheduler, Arc::clone(&ingestor));

        Ok(Self {
            config,
            store,
            stats,
            event_types,
            triggers,
            alerts,
            ingestor,
            cron,
        })
    }

    /// Builds an engine and brings it up: creates the index if missing,
    /// ensures the system event types, re-arms persisted repeating events
    /// and starts the scheduler.
    pub fn bootstrap(
        config: EngineConfig,
        store: Arc<dyn ContentStore>,
        queue: Arc<dyn JobQueue>,
        scheduler: Arc<dyn Scheduler>,
    ) -> AlertResult<(Self, RecoveryReport)> {
        if !store.index_exists()? {
            store.create_index()?;
            tracing::info!("content index created");
        }
        let engine = Self::new(config, store, queue, Arc::clone(&scheduler))?;
        engine.event_types.ensure_system_types()?;
        let report = engine.cron.recover()?;
        scheduler.start()?;
        tracing::info!(namespace = %engine.config.namespace, "alert engine started");
        Ok((engine, report))
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    #[must_use]
    pub fn cron(&self) -> &CronScheduler {
        &self.cron
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn clamp(&self, page: Page) -> Page {
        page.clamped(self.config.max_page_size)
    }

    // Event types

    pub fn create_event_type(&self, name: &str, mapping: Mapping, created_by: &str) -> AlertResult<EventType> {
        self.event_types.create(name, mapping, created_by)
    }

    pub fn event_type(&self, id: EventTypeId) -> AlertResult<EventType> {
        self.event_types.get(id)
    }

    pub fn event_type_by_name(&self, name: &str) -> AlertResult<EventType> {
        self.event_types.get_by_name(name)
    }

    pub fn event_types(&self, page: Page) -> AlertResult<Paged<EventType>> {
        self.event_types.list(self.clamp(page))
    }

    pub fn delete_event_type(&self, id: EventTypeId) -> AlertResult<()> {
        self.event_types.delete(id)
    }

    // Events

    /// Ingests an event; see [`EventIngestor::ingest`].
    pub fn create_event(&self, new: NewEvent) -> AlertResult<Event> {
        let report = self.create_event_with_report(new)?;
        match report.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(report.event),
        }
    }

    /// Ingests an event and, if it carries a schedule, registers it to
    /// repeat. The schedule is checked before the event is stored; if the
    /// registration fails the stored event is removed again, whatever its
    /// type.
    pub fn create_event_with_report(&self, new: NewEvent) -> AlertResult<IngestReport> {
        if let Some(expression) = &new.cron_schedule {
            parse_schedule(expression)?;
        }

        let report = self.ingestor.ingest_with_report(new)?;
        if let Some(expression) = &report.event.cron_schedule {
            if let Err(err) = self.cron.register_repeating(&report.event, expression) {
                if let Err(cleanup) = self.ingestor.discard(&report.event) {
                    tracing::warn!(event_id = %report.event.event_id, error = %cleanup, "failed to remove event after cron registration failure");
                }
                return Err(err);
            }
        }
        Ok(report)
    }

    pub fn event(&self, id: EventId) -> AlertResult<Event> {
        self.ingestor.get(id)
    }

    /// Looks an event up within a known type without scanning the others.
    pub fn event_of_type(&self, event_type_id: EventTypeId, id: EventId) -> AlertResult<Event> {
        self.ingestor.get_of_type(event_type_id, id)
    }

    pub fn events(&self, event_type_id: EventTypeId, page: Page) -> AlertResult<Paged<Event>> {
        self.ingestor.list(event_type_id, self.clamp(page))
    }

    /// Deletes an event and cancels its repeat schedule, if any.
    ///
    /// The schedule is cancelled first; if that fails the event is kept and
    /// the error returned.
    pub fn delete_event(&self, id: EventId) -> AlertResult<Event> {
        self.ingestor.delete_with(id, |event| {
            if event.is_repeating() {
                self.cron.cancel_repeating(event.event_id)?;
            }
            Ok(())
        })
    }

    pub fn repeating(&self, page: Page) -> AlertResult<Paged<CronEntry>> {
        self.cron.list(self.clamp(page))
    }

    // Triggers

    pub fn create_trigger(&self, new: NewTrigger) -> AlertResult<Trigger> {
        self.triggers.create(new)
    }

    pub fn trigger(&self, id: TriggerId) -> AlertResult<Trigger> {
        self.triggers.get(id)
    }

    pub fn triggers(&self, page: Page) -> AlertResult<Paged<Trigger>> {
        self.triggers.list(self.clamp(page))
    }

    pub fn update_trigger(&self, id: TriggerId, update: TriggerUpdate) -> AlertResult<Trigger> {
        self.triggers.update(id, update)
    }

    pub fn delete_trigger(&self, id: TriggerId) -> AlertResult<()> {
        self.triggers.delete(id)
    }

    /// Re-runs one firing. Idempotent per (trigger, event).
    pub fn refire(&self, trigger_id: TriggerId, event_id: EventId) -> AlertResult<FireOutcome> {
        self.ingestor.refire(trigger_id, event_id)
    }

    // Alerts

    pub fn alert(&self, id: AlertId) -> AlertResult<Alert> {
        self.alerts.get(id)
    }

    pub fn alerts(&self, page: Page) -> AlertResult<Paged<Alert>> {
        self.alerts.list(self.clamp(page))
    }

    pub fn alerts_by_trigger(&self, trigger_id: TriggerId, page: Page) -> AlertResult<Paged<Alert>> {
        self.alerts.list_by_trigger(trigger_id, self.clamp(page))
    }

    pub fn alerts_by_event(&self, event_id: EventId, page: Page) -> AlertResult<Paged<Alert>> {
        self.alerts.list_by_event(event_id, self.clamp(page))
    }

    pub fn delete_alert(&self, id: AlertId) -> AlertResult<()> {
        self.alerts.delete(id)
    }
}
