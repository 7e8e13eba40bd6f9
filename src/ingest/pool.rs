//! Bounded FireTask worker pool.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::error::{AlertError, AlertResult};
use crate::ingest::fire::{FireContext, FireOutcome, FireTask};

struct FireJob {
    task: FireTask,
    reply: Sender<AlertResult<FireOutcome>>,
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Fixed set of worker threads fed by a bounded channel.
pub(crate) struct FirePool {
    tx: Option<Sender<FireJob>>,
    workers: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl FirePool {
    pub(crate) fn start(
        ctx: Arc<FireContext>,
        workers: usize,
        queue_capacity: usize,
        timeout: Duration,
    ) -> AlertResult<Self> {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<FireJob>(queue_capacity.max(1));

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<FireJob> = rx.clone();
            let ctx = Arc::clone(&ctx);
            let handle = thread::Builder::new()
                .name(format!("kyroalert-fire-{idx}"))
                .spawn(move || {
                    while let Ok(FireJob { task, reply }) = rx.recv() {
                        let _ = reply.send(task.run(&ctx));
                    }
                })
                .map_err(|e| AlertError::internal(format!("failed to spawn fire worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            timeout,
        })
    }

    /// Queues a task. The task's deadline starts now and covers queueing.
    pub(crate) fn submit(&self, task: FireTask) -> AlertResult<FireHandle> {
        let deadline = Instant::now() + self.timeout;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| AlertError::internal("fire pool is shut down"))?;
        let (reply, rx) = bounded(1);

        match tx.send_timeout(FireJob { task, reply }, self.timeout) {
            Ok(()) => Ok(FireHandle {
                rx,
                deadline,
                timeout: self.timeout,
            }),
            Err(SendTimeoutError::Timeout(_)) => Err(AlertError::Timeout {
                duration_ms: duration_ms(self.timeout),
            }),
            Err(SendTimeoutError::Disconnected(_)) => Err(AlertError::internal("fire pool is shut down")),
        }
    }

    /// Runs one task and waits for it.
    pub(crate) fn run(&self, task: FireTask) -> AlertResult<FireOutcome> {
        self.submit(task)?.join()
    }
}

impl Drop for FirePool {
    fn drop(&mut self) {
        // Close the channel: workers drain queued tasks then exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Pending result of a submitted task.
pub(crate) struct FireHandle {
    rx: Receiver<AlertResult<FireOutcome>>,
    deadline: Instant,
    timeout: Duration,
}

impl FireHandle {
    /// Waits until the task's deadline. A timed-out task may still finish
    /// in the background.
    pub(crate) fn join(self) -> AlertResult<FireOutcome> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(AlertError::Timeout {
                duration_ms: duration_ms(self.timeout),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(AlertError::internal("fire worker exited without a result"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::NewEvent;
    use crate::id::TriggerId;
    use crate::ingest::fire::testing::Fixture;

    #[test]
    fn failures_stay_with_their_task() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        let trigger = f.seventeen(&et, "seventeen");
        let event = Arc::new(NewEvent::new(et.id, json!({"num": 17})).stamp());
        let pool = FirePool::start(Arc::clone(&f.ctx), 2, 4, Duration::from_secs(5)).unwrap();

        let missing = pool
            .submit(FireTask::new(TriggerId::new(), Arc::clone(&event)))
            .unwrap();
        let healthy = pool.submit(FireTask::new(trigger.id, event)).unwrap();

        assert!(missing.join().unwrap_err().is_not_found());
        assert!(matches!(healthy.join().unwrap(), FireOutcome::Fired(_)));
        assert_eq!(f.queue.len(), 1);
    }

    #[test]
    fn dropping_the_pool_drains_queued_tasks() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        let trigger = f.seventeen(&et, "seventeen");
        let pool = FirePool::start(Arc::clone(&f.ctx), 1, 8, Duration::from_secs(5)).unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let event = Arc::new(NewEvent::new(et.id, json!({"num": 17})).stamp());
                pool.submit(FireTask::new(trigger.id, event)).unwrap()
            })
            .collect();
        drop(pool);

        for handle in handles {
            assert!(matches!(handle.join().unwrap(), FireOutcome::Fired(_)));
        }
        assert_eq!(f.queue.len(), 3);
    }

    #[test]
    fn zero_workers_still_runs_tasks() {
        let f = Fixture::new();
        let et = f.num_type("ET");
        let trigger = f.seventeen(&et, "seventeen");
        let pool = FirePool::start(Arc::clone(&f.ctx), 0, 0, Duration::from_secs(5)).unwrap();

        let event = Arc::new(NewEvent::new(et.id, json!({"num": 17})).stamp());
        assert!(matches!(
            pool.run(FireTask::new(trigger.id, event)).unwrap(),
            FireOutcome::Fired(_)
        ));
    }
}
