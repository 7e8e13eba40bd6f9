//! Repeating events.
//!
//! An event submitted with a cron schedule is stored once and then
//! re-ingested on every tick as a fresh event with the same type and data.
//! Registrations are persisted as [`CronEntry`] records so [`CronScheduler::recover`]
//! can re-arm them after a restart.

mod scheduler;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AlertError, AlertResult, RecordKind};
use crate::event::{Event, NewEvent};
use crate::id::{EventId, EventTypeId};
use crate::ingest::EventIngestor;
use crate::store::{from_doc, partition, to_doc, ContentStore, Page, Paged};

pub use scheduler::{ManualScheduler, Runnable, Scheduler, ThreadScheduler};

const RECOVERY_PAGE: usize = 100;

/// Parses a cron expression.
///
/// Accepts 6 or 7 fields (seconds first, optional year) and classic 5-field
/// expressions, which get a `0` seconds column.
pub fn parse_schedule(expression: &str) -> AlertResult<Schedule> {
    let bad = |reason: String| AlertError::BadSchedule {
        expression: expression.to_string(),
        reason,
    };
    let trimmed = expression.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        n => return Err(bad(format!("expected 5, 6 or 7 fields, got {n}"))),
    };
    let schedule = Schedule::from_str(&normalized).map_err(|e| bad(e.to_string()))?;
    if schedule.upcoming(Utc).next().is_none() {
        return Err(bad("schedule never fires".to_string()));
    }
    Ok(schedule)
}

/// Persisted registration of a repeating event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronEntry {
    pub event_id: EventId,
    pub event_type_id: EventTypeId,
    pub data: JsonValue,
    pub cron_schedule: String,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
}

impl CronEntry {
    fn tick_event(&self) -> NewEvent {
        NewEvent::new(self.event_type_id, self.data.clone()).created_by(self.created_by.clone())
    }
}

/// Outcome of [`CronScheduler::recover`].
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub restored: Vec<EventId>,
    /// Entries that could not be re-armed, with the reason. They are removed.
    pub failed: Vec<(EventId, AlertError)>,
}

/// Arms repeating events on a [`Scheduler`].
pub struct CronScheduler {
    store: Arc<dyn ContentStore>,
    scheduler: Arc<dyn Scheduler>,
    ingestor: Arc<EventIngestor>,
}

impl CronScheduler {
    pub fn new(
        store: Arc<dyn ContentStore>,
        scheduler: Arc<dyn Scheduler>,
        ingestor: Arc<EventIngestor>,
    ) -> Self {
        Self {
            store,
            scheduler,
            ingestor,
        }
    }

    /// Registers `event` to repeat on `expression`.
    ///
    /// The expression is parsed before anything is written. If the live
    /// scheduler rejects the job, the persisted entry is removed again.
    pub fn register_repeating(&self, event: &Event, expression: &str) -> AlertResult<()> {
        parse_schedule(expression)?;

        let entry = CronEntry {
            event_id: event.event_id,
            event_type_id: event.event_type_id,
            data: event.data.clone(),
            cron_schedule: expression.to_string(),
            created_by: event.created_by.clone(),
            created_on: Utc::now(),
        };
        let key = entry.event_id.to_string();
        self.store.put(partition::CRON_ENTRY, &key, to_doc(&entry)?)?;

        if let Err(err) = self.arm(&entry) {
            if let Err(cleanup) = self.store.delete(partition::CRON_ENTRY, &key) {
                tracing::warn!(event_id = %key, error = %cleanup, "failed to remove cron entry after scheduling failure");
            }
            return Err(err);
        }
        tracing::info!(event_id = %key, schedule = expression, "repeating event registered");
        Ok(())
    }

    fn arm(&self, entry: &CronEntry) -> AlertResult<()> {
        let ingestor = Arc::clone(&self.ingestor);
        let template = entry.clone();
        let tick: Runnable = Arc::new(move || match ingestor.ingest(template.tick_event()) {
            Ok(event) => tracing::info!(
                source_event_id = %template.event_id,
                event_id = %event.event_id,
                "cron tick ingested"
            ),
            Err(err) => tracing::warn!(
                source_event_id = %template.event_id,
                error = %err,
                "cron tick failed"
            ),
        });
        self.scheduler
            .add_job(&entry.event_id.to_string(), &entry.cron_schedule, tick)
    }

    /// Stops a repeating event. Returns whether anything was registered.
    ///
    /// The persisted entry goes first; if removing it fails the live job
    /// keeps running. The live job is removed even if the entry is already
    /// gone.
    pub fn cancel_repeating(&self, event_id: EventId) -> AlertResult<bool> {
        let key = event_id.to_string();
        let stored = self.store.delete(partition::CRON_ENTRY, &key)?;
        let live = self.scheduler.remove_job(&key);
        if live || stored {
            tracing::info!(event_id = %key, live, stored, "repeating event cancelled");
        }
        Ok(live || stored)
    }

    pub fn find(&self, event_id: EventId) -> AlertResult<Option<CronEntry>> {
        let key = event_id.to_string();
        match self.store.get(partition::CRON_ENTRY, &key)? {
            Some(doc) => Ok(Some(from_doc(&key, doc)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, event_id: EventId) -> AlertResult<CronEntry> {
        self.find(event_id)?
            .ok_or_else(|| AlertError::not_found(RecordKind::CronEntry, event_id))
    }

    pub fn list(&self, page: Page) -> AlertResult<Paged<CronEntry>> {
        Ok(self.store.search_all(partition::CRON_ENTRY, page)?.into_paged()?)
    }

    /// Re-arms every persisted entry. Called once at start-up.
    ///
    /// Entries that cannot be re-armed, such as a bad schedule or a deleted
    /// source event, are reported and removed without stopping recovery of
    /// the rest.
    pub fn recover(&self) -> AlertResult<RecoveryReport> {
        let mut entries = Vec::new();
        let mut from = 0;
        loop {
            let page = self
                .store
                .search_all(partition::CRON_ENTRY, Page::new(from, RECOVERY_PAGE))?;
            let total = page.total;
            from += page.hits.len();
            let done = page.hits.is_empty() || from >= total;
            for hit in page.hits {
                entries.push((hit.id.clone(), from_doc::<CronEntry>(&hit.id, hit.source)));
            }
            if done {
                break;
            }
        }

        let mut report = RecoveryReport::default();
        for (key, decoded) in entries {
            let armed = decoded.map_err(AlertError::from).and_then(|entry| {
                parse_schedule(&entry.cron_schedule)?;
                self.ingestor.get_of_type(entry.event_type_id, entry.event_id)?;
                self.arm(&entry).map(|()| entry.event_id)
            });
            match armed {
                Ok(event_id) => report.restored.push(event_id),
                Err(err) => {
                    tracing::warn!(event_id = %key, error = %err, "cron entry could not be recovered; removing");
                    if let Err(cleanup) = self.store.delete(partition::CRON_ENTRY, &key) {
                        tracing::warn!(event_id = %key, error = %cleanup, "failed to remove unrecoverable cron entry");
                    }
                    match key.parse::<EventId>() {
                        Ok(event_id) => report.failed.push((event_id, err)),
                        Err(_) => tracing::warn!(key = %key, "cron entry key is not an event id"),
                    }
                }
            }
        }

        tracing::info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "cron recovery finished"
        );
        Ok(report)
    }
}
