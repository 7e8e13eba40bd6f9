//! Alerts: durable proof that a trigger fired for an event.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AlertError, AlertResult, RecordKind};
use crate::id::{AlertId, EventId, JobId, TriggerId};
use crate::stats::{Counter, StatsCounter};
use crate::store::{from_doc, partition, to_doc, ContentStore, Page, Paged};

/// Record of one firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub trigger_id: TriggerId,
    pub event_id: EventId,
    pub job_id: JobId,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
}

impl Alert {
    /// Alert for the (trigger, event) pair. Ids are derived from the pair.
    #[must_use]
    pub fn for_firing(trigger_id: TriggerId, event_id: EventId, created_by: impl Into<String>) -> Self {
        Self {
            id: AlertId::for_firing(trigger_id, event_id),
            trigger_id,
            event_id,
            job_id: JobId::for_firing(trigger_id, event_id),
            created_by: created_by.into(),
            created_on: Utc::now(),
        }
    }
}

/// Append-only alert log in the `alert` partition.
pub struct AlertLog {
    store: Arc<dyn ContentStore>,
    stats: Arc<StatsCounter>,
    // Serializes the existence check and write in `record`.
    write: Mutex<()>,
}

impl AlertLog {
    pub fn new(store: Arc<dyn ContentStore>, stats: Arc<StatsCounter>) -> Self {
        Self {
            store,
            stats,
            write: Mutex::new(()),
        }
    }

    /// Writes an alert. Rewriting the same firing replaces the record.
    ///
    /// Concurrent records of one firing count it once. The guarantee holds
    /// for writers sharing this log, not for other processes on the store.
    pub fn record(&self, alert: &Alert) -> AlertResult<()> {
        let key = alert.id.to_string();
        let _guard = self
            .write
            .lock()
            .map_err(|_| AlertError::internal("alert log lock poisoned"))?;
        let existed = self.store.get(partition::ALERT, &key)?.is_some();
        self.store.put(partition::ALERT, &key, to_doc(alert)?)?;
        if !existed {
            self.stats.increment(Counter::Alerts);
        }
        Ok(())
    }

    pub fn find(&self, id: AlertId) -> AlertResult<Option<Alert>> {
        let key = id.to_string();
        match self.store.get(partition::ALERT, &key)? {
            Some(doc) => Ok(Some(from_doc(&key, doc)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: AlertId) -> AlertResult<Alert> {
        self.find(id)?
            .ok_or_else(|| AlertError::not_found(RecordKind::Alert, id))
    }

    pub fn list(&self, page: Page) -> AlertResult<Paged<Alert>> {
        Ok(self.store.search_all(partition::ALERT, page)?.into_paged()?)
    }

    pub fn list_by_trigger(&self, trigger_id: TriggerId, page: Page) -> AlertResult<Paged<Alert>> {
        self.list_by("triggerId", trigger_id.to_string(), page)
    }

    pub fn list_by_event(&self, event_id: EventId, page: Page) -> AlertResult<Paged<Alert>> {
        self.list_by("eventId", event_id.to_string(), page)
    }

    fn list_by(&self, field: &str, value: String, page: Page) -> AlertResult<Paged<Alert>> {
        Ok(self
            .store
            .search_by_term(partition::ALERT, field, &JsonValue::from(value), page)?
            .into_paged()?)
    }

    /// Administrative cleanup.
    pub fn delete(&self, id: AlertId) -> AlertResult<()> {
        if self.store.delete(partition::ALERT, &id.to_string())? {
            Ok(())
        } else {
            Err(AlertError::not_found(RecordKind::Alert, id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContentStore;

    #[test]
    fn record_is_idempotent_per_firing() {
        let stats = Arc::new(StatsCounter::new());
        let log = AlertLog::new(Arc::new(InMemoryContentStore::open()), stats.clone());
        let (trigger, event) = (TriggerId::new(), EventId::new());

        log.record(&Alert::for_firing(trigger, event, "engine")).unwrap();
        log.record(&Alert::for_firing(trigger, event, "engine")).unwrap();
        log.record(&Alert::for_firing(trigger, EventId::new(), "engine")).unwrap();
        log.record(&Alert::for_firing(TriggerId::new(), event, "engine")).unwrap();

        assert_eq!(log.list(Page::first(10)).unwrap().total, 3);
        assert_eq!(stats.snapshot().num_alerts, 3);
        assert_eq!(log.list_by_trigger(trigger, Page::first(10)).unwrap().total, 2);
        assert_eq!(log.list_by_event(event, Page::first(10)).unwrap().total, 2);
    }

    #[test]
    fn concurrent_records_of_one_firing_count_once() {
        let stats = Arc::new(StatsCounter::new());
        let log = Arc::new(AlertLog::new(Arc::new(InMemoryContentStore::open()), stats.clone()));
        let alert = Alert::for_firing(TriggerId::new(), EventId::new(), "engine");

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let log = Arc::clone(&log);
                let alert = alert.clone();
                std::thread::spawn(move || log.record(&alert).unwrap())
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(stats.snapshot().num_alerts, 1);
        assert_eq!(log.list(Page::first(10)).unwrap().total, 1);
    }

    #[test]
    fn get_and_delete() {
        let log = AlertLog::new(Arc::new(InMemoryContentStore::open()), Arc::new(StatsCounter::new()));
        let alert = Alert::for_firing(TriggerId::new(), EventId::new(), "engine");
        log.record(&alert).unwrap();

        assert_eq!(log.get(alert.id).unwrap(), alert);
        log.delete(alert.id).unwrap();
        assert!(log.get(alert.id).unwrap_err().is_not_found());
        assert!(log.delete(alert.id).unwrap_err().is_not_found());
    }
}
