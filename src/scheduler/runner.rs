//! Job execution
//!
//! `JobScheduler` is the seam to whatever actually runs jobs at their fire
//! times. `TokioScheduler` runs each job as a tokio task that sleeps until
//! the next fire time and then awaits the callback, so one job never
//! overlaps itself.

use crate::core::sync::recover_mutex;
use crate::scheduler::error::{SchedulerError, SchedulerResult};
use crate::scheduler::trigger::Trigger;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;

/// Work run at each fire time
pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A registered job
pub trait JobHandle: Send + Sync {
    fn job_id(&self) -> &str;

    /// Stop the job; removing twice is a no-op
    fn remove(&self);
}

pub trait JobScheduler: Send + Sync {
    /// Register `callback` to run at the fire times of `trigger`
    ///
    /// An existing job with the same id is replaced.
    fn add_job(
        &self,
        job_id: &str,
        trigger: Trigger,
        callback: JobCallback,
    ) -> SchedulerResult<Box<dyn JobHandle>>;
}

struct JobEntry {
    serial: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct RunnerState {
    next_serial: u64,
    jobs: HashMap<String, JobEntry>,
}

/// Runs jobs on the current tokio runtime
#[derive(Clone, Default)]
pub struct TokioScheduler {
    state: Arc<Mutex<RunnerState>>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("jobs", &self.job_ids())
            .finish()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = recover_mutex(self.state.lock()).jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        recover_mutex(self.state.lock()).jobs.contains_key(job_id)
    }

    /// Abort every job
    pub fn shutdown(&self) {
        let jobs: Vec<(String, JobEntry)> = recover_mutex(self.state.lock()).jobs.drain().collect();
        for (job_id, entry) in jobs {
            log::debug!("Aborting job {}", job_id);
            entry.task.abort();
        }
    }
}

async fn run_job(job_id: String, trigger: Trigger, callback: JobCallback) {
    let mut previous: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let Some(next) = trigger.next_fire_time(previous, now) else {
            log::info!("Job {} has no further fire times", job_id);
            return;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        log::trace!("Job {} next fires at {}", job_id, next);
        tokio::time::sleep(wait).await;

        log::debug!("Running job {}", job_id);
        callback().await;
        previous = Some(next);
    }
}

impl JobScheduler for TokioScheduler {
    fn add_job(
        &self,
        job_id: &str,
        trigger: Trigger,
        callback: JobCallback,
    ) -> SchedulerResult<Box<dyn JobHandle>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime {
            job_id: job_id.to_string(),
        })?;

        let mut state = recover_mutex(self.state.lock());
        state.next_serial += 1;
        let serial = state.next_serial;

        log::debug!("Adding job {} with trigger {}", job_id, trigger);
        let task = runtime.spawn(run_job(job_id.to_string(), trigger, callback));
        if let Some(replaced) = state.jobs.insert(job_id.to_string(), JobEntry { serial, task }) {
            log::warn!("Job {} already existed, replacing it", job_id);
            replaced.task.abort();
        }

        Ok(Box::new(TokioJobHandle {
            job_id: job_id.to_string(),
            serial,
            state: Arc::downgrade(&self.state),
        }))
    }
}

struct TokioJobHandle {
    job_id: String,
    serial: u64,
    state: Weak<Mutex<RunnerState>>,
}

impl JobHandle for TokioJobHandle {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn remove(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = recover_mutex(state.lock());
        // a replacement job under the same id belongs to someone else
        if state
            .jobs
            .get(&self.job_id)
            .is_some_and(|entry| entry.serial == self.serial)
        {
            if let Some(entry) = state.jobs.remove(&self.job_id) {
                log::debug!("Removing job {}", self.job_id);
                entry.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::trigger::parse_schedule_trigger;
    use futures::future::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_callback(counter: Arc<AtomicUsize>) -> JobCallback {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_interval_job_runs_until_removed() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let trigger = parse_schedule_trigger("interval", "seconds=1").unwrap();

        let handle = scheduler
            .add_job("scheduler_1", trigger, counting_callback(counter.clone()))
            .unwrap();
        assert!(scheduler.has_job("scheduler_1"));

        tokio::time::sleep(Duration::from_millis(2300)).await;
        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 1, "job fired {fired} times");

        handle.remove();
        handle.remove();
        assert!(!scheduler.has_job("scheduler_1"));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_replaced_job_keeps_new_entry() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let trigger = parse_schedule_trigger("interval", "hours=1").unwrap();

        let old = scheduler
            .add_job("scheduler_1", trigger.clone(), counting_callback(counter.clone()))
            .unwrap();
        let new = scheduler
            .add_job("scheduler_1", trigger, counting_callback(counter))
            .unwrap();

        // the stale handle must not remove the replacement
        old.remove();
        assert!(scheduler.has_job("scheduler_1"));

        new.remove();
        assert!(scheduler.job_ids().is_empty());
    }

    #[test]
    fn test_add_job_requires_runtime() {
        let scheduler = TokioScheduler::new();
        let trigger = parse_schedule_trigger("interval", "hours=1").unwrap();
        let err = scheduler
            .add_job("scheduler_1", trigger, counting_callback(Arc::new(AtomicUsize::new(0))))
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::NoRuntime { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_all() {
        let scheduler = TokioScheduler::new();
        for id in ["a", "b"] {
            let trigger = parse_schedule_trigger("interval", "hours=1").unwrap();
            scheduler
                .add_job(id, trigger, counting_callback(Arc::new(AtomicUsize::new(0))))
                .unwrap();
        }
        assert_eq!(scheduler.job_ids(), vec!["a", "b"]);
        scheduler.shutdown();
        assert!(scheduler.job_ids().is_empty());
    }
}
