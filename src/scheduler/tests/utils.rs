//! Scheduler Test Utilities

use crate::plugin::api::{register_builtin_plugins, MemoryPermissions, NewPlugin, PluginManager, PluginRecord};
use crate::scheduler::error::SchedulerResult;
use crate::scheduler::manager::ScheduleManager;
use crate::scheduler::runner::{JobCallback, JobHandle, JobScheduler};
use crate::scheduler::trigger::Trigger;
use crate::scheduler::types::{NewSchedule, Schedule};
use crate::store::{MemoryStore, PluginStore, ScheduleStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct RecordedJob {
    serial: u64,
    trigger: Trigger,
    callback: JobCallback,
}

#[derive(Default)]
struct Recorded {
    next_serial: u64,
    jobs: HashMap<String, RecordedJob>,
}

/// Job scheduler that only remembers its jobs; tests fire them by hand
#[derive(Default)]
pub struct RecordingRunner {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.recorded.lock().unwrap().jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn trigger(&self, job_id: &str) -> Option<Trigger> {
        self.recorded
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .map(|job| job.trigger.clone())
    }

    /// Run a job's callback once; `false` when there is no such job
    pub async fn fire(&self, job_id: &str) -> bool {
        let callback = self
            .recorded
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .map(|job| job.callback.clone());
        match callback {
            Some(callback) => {
                callback().await;
                true
            }
            None => false,
        }
    }
}

impl JobScheduler for RecordingRunner {
    fn add_job(
        &self,
        job_id: &str,
        trigger: Trigger,
        callback: JobCallback,
    ) -> SchedulerResult<Box<dyn JobHandle>> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.next_serial += 1;
        let serial = recorded.next_serial;
        recorded.jobs.insert(
            job_id.to_string(),
            RecordedJob {
                serial,
                trigger,
                callback,
            },
        );
        Ok(Box::new(RecordedHandle {
            job_id: job_id.to_string(),
            serial,
            recorded: self.recorded.clone(),
        }))
    }
}

struct RecordedHandle {
    job_id: String,
    serial: u64,
    recorded: Arc<Mutex<Recorded>>,
}

impl JobHandle for RecordedHandle {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn remove(&self) {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded
            .jobs
            .get(&self.job_id)
            .is_some_and(|job| job.serial == self.serial)
        {
            recorded.jobs.remove(&self.job_id);
        }
    }
}

/// Built-in plugins over a memory store, with a schedule manager that is
/// not started yet
pub struct SchedulerEnv {
    pub plugins: Arc<PluginManager>,
    pub store: Arc<MemoryStore>,
    pub runner: Arc<RecordingRunner>,
    pub schedules: Arc<ScheduleManager>,
}

impl SchedulerEnv {
    pub fn new() -> Self {
        Self::with_prefix("scheduler_")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        let plugins = PluginManager::new(store.clone(), Arc::new(MemoryPermissions::new()));
        register_builtin_plugins(&plugins).unwrap();
        let plugins = Arc::new(plugins);
        let runner = Arc::new(RecordingRunner::new());
        let schedules =
            ScheduleManager::with_job_id_prefix(plugins.clone(), store.clone(), runner.clone(), prefix);
        Self {
            plugins,
            store,
            runner,
            schedules,
        }
    }

    pub async fn seed_storage(&self, name: &str) -> PluginRecord {
        self.store
            .create_plugin(NewPlugin::new("storage", "memory", name))
            .await
            .unwrap()
    }

    pub async fn seed_schedule(&self, new: NewSchedule) -> Schedule {
        self.store.create_schedule(new).await.unwrap()
    }

    pub async fn load(&self, record: &PluginRecord) {
        self.plugins
            .get_or_create_record(record)
            .await
            .unwrap()
            .unwrap();
    }
}
