//! Process-lifetime counters.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub created_on: DateTime<Utc>,
    pub num_event_types: u64,
    pub num_events: u64,
    pub num_triggers: u64,
    pub num_alerts: u64,
    pub num_triggered_jobs: u64,
}

/// Counter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    EventTypes,
    Events,
    Triggers,
    Alerts,
    TriggeredJobs,
}

/// Mutex-guarded counters. Only [`StatsCounter::increment`] mutates them.
#[derive(Debug)]
pub struct StatsCounter {
    inner: Mutex<StatsSnapshot>,
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsSnapshot {
                created_on: Utc::now(),
                num_event_types: 0,
                num_events: 0,
                num_triggers: 0,
                num_alerts: 0,
                num_triggered_jobs: 0,
            }),
        }
    }

    pub fn increment(&self, counter: Counter) {
        let Ok(mut stats) = self.inner.lock() else {
            tracing::warn!(?counter, "stats lock poisoned; increment dropped");
            return;
        };
        let slot = match counter {
            Counter::EventTypes => &mut stats.num_event_types,
            Counter::Events => &mut stats.num_events,
            Counter::Triggers => &mut stats.num_triggers,
            Counter::Alerts => &mut stats.num_alerts,
            Counter::TriggeredJobs => &mut stats.num_triggered_jobs,
        };
        *slot = slot.saturating_add(1);
    }

    /// Copies the counters out under the lock.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        match self.inner.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatsCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.increment(Counter::Events);
                        stats.increment(Counter::Alerts);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.num_events, 8000);
        assert_eq!(snap.num_alerts, 8000);
        assert_eq!(snap.num_triggers, 0);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let stats = StatsCounter::new();
        stats.increment(Counter::EventTypes);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["numEventTypes"], 1);
        assert!(json.get("createdOn").is_some());
    }
}
