//! Recurring job schedulers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::cron::parse_schedule;
use crate::error::{AlertError, AlertResult};

/// Work run on every tick.
pub type Runnable = Arc<dyn Fn() + Send + Sync>;

/// Runs keyed jobs on cron schedules.
pub trait Scheduler: Send + Sync {
    /// Adds (or replaces) the job under `key`. Fails with `BadSchedule` if
    /// `expression` does not parse.
    fn add_job(&self, key: &str, expression: &str, job: Runnable) -> AlertResult<()>;

    /// Removes a job. Returns whether it was registered.
    fn remove_job(&self, key: &str) -> bool;

    /// Starts ticking. Jobs added before start are kept.
    fn start(&self) -> AlertResult<()>;

    /// Keys of the registered jobs.
    fn job_keys(&self) -> Vec<String>;
}

enum Command {
    Add {
        key: String,
        schedule: Schedule,
        job: Runnable,
    },
    Remove {
        key: String,
    },
    Shutdown,
}

struct ScheduledJob {
    schedule: Schedule,
    job: Runnable,
    next: Option<DateTime<Utc>>,
}

/// Scheduler backed by one control thread.
///
/// The control thread sleeps until the earliest due job; each tick runs on
/// its own short-lived thread so a slow tick never delays another.
pub struct ThreadScheduler {
    tx: Sender<Command>,
    rx: Mutex<Option<Receiver<Command>>>,
    keys: Mutex<HashSet<String>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            keys: Mutex::new(HashSet::new()),
            handle: Mutex::new(None),
        }
    }

    fn keys(&self) -> AlertResult<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.keys
            .lock()
            .map_err(|_| AlertError::internal("scheduler key lock poisoned"))
    }

    fn run(rx: &Receiver<Command>) {
        let mut jobs: HashMap<String, ScheduledJob> = HashMap::new();
        loop {
            let next_due = jobs.values().filter_map(|j| j.next).min();
            let command = match next_due {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    rx.recv_timeout(wait)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match command {
                Ok(Command::Add { key, schedule, job }) => {
                    let next = schedule.upcoming(Utc).next();
                    tracing::debug!(key = %key, next = ?next, "cron job scheduled");
                    jobs.insert(key, ScheduledJob { schedule, job, next });
                }
                Ok(Command::Remove { key }) => {
                    jobs.remove(&key);
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => Self::run_due(&mut jobs),
            }
        }
        tracing::debug!("cron scheduler stopped");
    }

    fn run_due(jobs: &mut HashMap<String, ScheduledJob>) {
        let now = Utc::now();
        for (key, scheduled) in jobs.iter_mut() {
            if !scheduled.next.is_some_and(|at| at <= now) {
                continue;
            }
            scheduled.next = scheduled.schedule.after(&now).next();
            let job = Arc::clone(&scheduled.job);
            let spawned = thread::Builder::new()
                .name("kyroalert-cron-tick".to_string())
                .spawn(move || job());
            if let Err(err) = spawned {
                tracing::warn!(key = %key, error = %err, "failed to spawn cron tick");
            }
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn add_job(&self, key: &str, expression: &str, job: Runnable) -> AlertResult<()> {
        let schedule = parse_schedule(expression)?;
        self.tx
            .send(Command::Add {
                key: key.to_string(),
                schedule,
                job,
            })
            .map_err(|_| AlertError::internal("cron scheduler stopped"))?;
        self.keys()?.insert(key.to_string());
        Ok(())
    }

    fn remove_job(&self, key: &str) -> bool {
        let _ = self.tx.send(Command::Remove {
            key: key.to_string(),
        });
        self.keys().map(|mut keys| keys.remove(key)).unwrap_or(false)
    }

    fn start(&self) -> AlertResult<()> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| AlertError::internal("scheduler lock poisoned"))?
            .take();
        let Some(rx) = rx else {
            return Ok(());
        };
        let handle = thread::Builder::new()
            .name("kyroalert-cron".to_string())
            .spawn(move || Self::run(&rx))
            .map_err(|e| AlertError::internal(format!("failed to spawn cron scheduler: {e}")))?;
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    fn job_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keys()
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Ok(mut slot) = self.handle.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Scheduler driven explicitly by its owner on a virtual clock.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

struct ManualState {
    clock: DateTime<Utc>,
    started: bool,
    jobs: BTreeMap<String, ScheduledJob>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Clock starts at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    #[must_use]
    pub fn starting_at(clock: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                clock,
                started: false,
                jobs: BTreeMap::new(),
            }),
        }
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ok().map(|s| s.clock)
    }

    /// Moves the clock to `until`, running every tick that falls due on the
    /// way in time order. Returns the number of ticks run. Nothing runs
    /// before [`Scheduler::start`].
    pub fn advance_to(&self, until: DateTime<Utc>) -> usize {
        let mut ran = 0;
        loop {
            let due = {
                let Ok(mut state) = self.state.lock() else {
                    return ran;
                };
                if !state.started {
                    state.clock = state.clock.max(until);
                    return ran;
                }
                let next = state
                    .jobs
                    .iter()
                    .filter_map(|(key, j)| j.next.map(|at| (at, key.clone())))
                    .filter(|(at, _)| *at <= until)
                    .min();
                match next {
                    None => {
                        state.clock = state.clock.max(until);
                        return ran;
                    }
                    Some((at, key)) => {
                        state.clock = at;
                        state.jobs.get_mut(&key).map(|j| {
                            j.next = j.schedule.after(&at).next();
                            Arc::clone(&j.job)
                        })
                    }
                }
            };
            // Run outside the lock so the tick may touch the scheduler.
            if let Some(job) = due {
                job();
                ran += 1;
            }
        }
    }

    /// Advances the clock by `by`.
    pub fn advance(&self, by: chrono::Duration) -> usize {
        match self.now() {
            Some(now) => self.advance_to(now + by),
            None => 0,
        }
    }

    /// Runs every registered job once, regardless of schedule.
    pub fn tick_all(&self) -> usize {
        let jobs: Vec<Runnable> = match self.state.lock() {
            Ok(state) => state.jobs.values().map(|j| Arc::clone(&j.job)).collect(),
            Err(_) => return 0,
        };
        jobs.iter().for_each(|job| job());
        jobs.len()
    }
}

impl Scheduler for ManualScheduler {
    fn add_job(&self, key: &str, expression: &str, job: Runnable) -> AlertResult<()> {
        let schedule = parse_schedule(expression)?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| AlertError::internal("scheduler lock poisoned"))?;
        let next = schedule.after(&state.clock).next();
        state
            .jobs
            .insert(key.to_string(), ScheduledJob { schedule, job, next });
        Ok(())
    }

    fn remove_job(&self, key: &str) -> bool {
        self.state
            .lock()
            .map(|mut state| state.jobs.remove(key).is_some())
            .unwrap_or(false)
    }

    fn start(&self) -> AlertResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AlertError::internal("scheduler lock poisoned"))?;
        if !state.started {
            state.started = true;
            let clock = state.clock;
            for job in state.jobs.values_mut() {
                job.next = job.schedule.after(&clock).next();
            }
        }
        Ok(())
    }

    fn job_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.jobs.keys().cloned().collect())
            .unwrap_or_default()
    }
}
