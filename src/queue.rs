//! Job queue contract.
//!
//! Instantiated jobs are handed to a downstream execution system through a
//! topic-keyed message queue. The engine only ever sends.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors raised by a job queue client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The broker could not be reached.
    #[error("job queue unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("job queue rejected message for topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },
}

/// Message producer for instantiated jobs.
pub trait JobQueue: Send + Sync {
    /// Sends `payload` to `topic` under `key`.
    fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError>;
}

/// A message captured by [`InMemoryJobQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

impl QueuedMessage {
    /// Parses the payload as JSON.
    pub fn payload_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<QueuedMessage>,
    failure: Option<QueueError>,
    delay: Option<Duration>,
}

/// Job queue that records every message in memory.
///
/// Can be switched into a failing or slow mode.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail with `error` (or succeed again with `None`).
    pub fn set_failure(&self, error: Option<QueueError>) {
        if let Ok(mut state) = self.state.lock() {
            state.failure = error;
        }
    }

    /// Delays every subsequent send.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut state) = self.state.lock() {
            state.delay = delay;
        }
    }

    /// Messages sent so far.
    #[must_use]
    pub fn messages(&self) -> Vec<QueuedMessage> {
        self.state
            .lock()
            .map(|state| state.messages.clone())
            .unwrap_or_default()
    }

    /// Number of messages sent so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.messages.len()).unwrap_or(0)
    }

    /// Returns true if nothing was sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobQueue for InMemoryJobQueue {
    fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError> {
        let delay = {
            let state = self
                .state
                .lock()
                .map_err(|_| QueueError::Unavailable("poisoned lock".to_string()))?;
            if let Some(err) = &state.failure {
                return Err(err.clone());
            }
            state.delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::Unavailable("poisoned lock".to_string()))?;
        state.messages.push(QueuedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_messages_in_order() {
        let queue = InMemoryJobQueue::new();
        queue.send("ns.job-requests", "k1", r#"{"a":1}"#).unwrap();
        queue.send("ns.job-requests", "k2", "{}").unwrap();

        let messages = queue.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].key, "k1");
        assert_eq!(messages[0].payload_json().unwrap()["a"], 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn failure_mode_rejects_until_cleared() {
        let queue = InMemoryJobQueue::new();
        queue.set_failure(Some(QueueError::Unavailable("down".to_string())));
        assert!(queue.send("t", "k", "{}").is_err());
        assert!(queue.is_empty());

        queue.set_failure(None);
        queue.send("t", "k", "{}").unwrap();
        assert_eq!(queue.len(), 1);
    }
}
