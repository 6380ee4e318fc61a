//! Schedule Manager
//!
//! Keeps the external scheduler's job set in line with plugin and schedule
//! state. A schedule has a registered job exactly when it is enabled and its
//! plugin is loaded. Jobs are indexed by plugin id, then schedule id.

use crate::core::sync::recover_mutex;
use crate::plugin::api::{
    CommandCall, CommandError, LifecycleListener, PluginError, PluginManager, PluginRecord,
    RecordId,
};
use crate::scheduler::error::{SchedulerError, SchedulerResult};
use crate::scheduler::runner::{JobCallback, JobHandle, JobScheduler};
use crate::scheduler::trigger::parse_schedule_trigger;
use crate::scheduler::types::{Schedule, ScheduleId};
use crate::store::{ScheduleObserver, ScheduleStore};
use async_trait::async_trait;
use futures::future::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub const DEFAULT_JOB_ID_PREFIX: &str = "scheduler_";

/// Result of running a schedule once
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The command ran and returned this value
    Executed(Value),
    /// Nothing was run
    Skipped(String),
    Failed(String),
}

impl TriggerOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, TriggerOutcome::Executed(_))
    }
}

type JobIndex = HashMap<RecordId, HashMap<ScheduleId, Box<dyn JobHandle>>>;

pub struct ScheduleManager {
    me: Weak<ScheduleManager>,
    plugins: Arc<PluginManager>,
    schedules: Arc<dyn ScheduleStore>,
    runner: Arc<dyn JobScheduler>,
    jobs: Mutex<JobIndex>,
    job_id_prefix: String,
    started: AtomicBool,
}

impl fmt::Debug for ScheduleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleManager")
            .field("job_id_prefix", &self.job_id_prefix)
            .field("jobs", &self.job_count())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl ScheduleManager {
    pub fn new(
        plugins: Arc<PluginManager>,
        schedules: Arc<dyn ScheduleStore>,
        runner: Arc<dyn JobScheduler>,
    ) -> Arc<Self> {
        Self::with_job_id_prefix(plugins, schedules, runner, DEFAULT_JOB_ID_PREFIX)
    }

    pub fn with_job_id_prefix(
        plugins: Arc<PluginManager>,
        schedules: Arc<dyn ScheduleStore>,
        runner: Arc<dyn JobScheduler>,
        job_id_prefix: impl Into<String>,
    ) -> Arc<Self> {
        let job_id_prefix = job_id_prefix.into();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            plugins,
            schedules,
            runner,
            jobs: Mutex::new(HashMap::new()),
            job_id_prefix,
            started: AtomicBool::new(false),
        })
    }

    pub fn job_id(&self, schedule_id: ScheduleId) -> String {
        format!("{}{}", self.job_id_prefix, schedule_id)
    }

    /// Subscribe to plugin and schedule events
    ///
    /// Plugins that are already loaded get their jobs registered right
    /// away. Returns the number of jobs registered that way.
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<usize> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::debug!("Schedule manager already started");
            return Ok(0);
        }

        self.plugins.add_listener(self.clone());
        self.schedules.add_observer(self.clone());

        let mut registered = 0;
        for instance in self.plugins.cache().list_loaded() {
            registered += self.load_schedules(instance.record()).await?;
        }
        log::info!("Schedule manager started with {} job(s)", registered);
        Ok(registered)
    }

    /// Unsubscribe and remove every job
    pub fn stop(self: &Arc<Self>) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let listener: Arc<dyn LifecycleListener> = self.clone();
        self.plugins.remove_listener(&listener);
        let observer: Arc<dyn ScheduleObserver> = self.clone();
        self.schedules.remove_observer(&observer);

        let jobs: Vec<Box<dyn JobHandle>> = recover_mutex(self.jobs.lock())
            .drain()
            .flat_map(|(_, jobs)| jobs.into_values())
            .collect();
        let count = jobs.len();
        for job in jobs {
            job.remove();
        }
        log::info!("Schedule manager stopped, removed {} job(s)", count);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // Job index

    pub fn has_job(&self, schedule_id: ScheduleId) -> bool {
        recover_mutex(self.jobs.lock())
            .values()
            .any(|jobs| jobs.contains_key(&schedule_id))
    }

    /// Schedule ids with a registered job for `plugin_id`, sorted
    pub fn jobs_for_plugin(&self, plugin_id: RecordId) -> Vec<ScheduleId> {
        let mut ids: Vec<ScheduleId> = recover_mutex(self.jobs.lock())
            .get(&plugin_id)
            .map(|jobs| jobs.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn job_count(&self) -> usize {
        recover_mutex(self.jobs.lock()).values().map(HashMap::len).sum()
    }

    // Loading and unloading

    /// Register jobs for every enabled schedule of a loaded plugin
    pub async fn load_schedules(&self, record: &PluginRecord) -> SchedulerResult<usize> {
        let schedules = self.schedules.list_schedules(record.id, Some(true)).await?;
        let mut registered = 0;
        for schedule in schedules {
            if self.register_job(&schedule)? {
                registered += 1;
            }
        }
        log::debug!("Loaded {} schedule(s) of {}", registered, record);
        Ok(registered)
    }

    /// Remove every job of a plugin
    pub fn unload_schedules(&self, plugin_id: RecordId) -> usize {
        let removed = recover_mutex(self.jobs.lock())
            .remove(&plugin_id)
            .unwrap_or_default();
        let count = removed.len();
        for job in removed.into_values() {
            job.remove();
        }
        count
    }

    /// Drop the schedule's job and register it again if it should run
    ///
    /// Returns whether a job is registered afterwards.
    pub async fn reload_schedule(&self, schedule: &Schedule) -> SchedulerResult<bool> {
        self.unload_schedule(schedule);
        if !schedule.enabled {
            log::debug!("{} is disabled", schedule);
            return Ok(false);
        }
        if !self.plugin_is_loaded(schedule.plugin_id).await? {
            log::debug!("Plugin of {} is not loaded", schedule);
            return Ok(false);
        }
        self.register_job(schedule)
    }

    /// Remove the schedule's job; `false` when it had none
    ///
    /// The job is found by schedule id alone, since the schedule may have
    /// moved to another plugin since it was registered.
    pub fn unload_schedule(&self, schedule: &Schedule) -> bool {
        let removed = {
            let mut jobs = recover_mutex(self.jobs.lock());
            let owner = jobs
                .iter()
                .find(|(_, plugin_jobs)| plugin_jobs.contains_key(&schedule.id))
                .map(|(plugin_id, _)| *plugin_id);
            owner.and_then(|plugin_id| {
                let plugin_jobs = jobs.get_mut(&plugin_id)?;
                let removed = plugin_jobs.remove(&schedule.id);
                if plugin_jobs.is_empty() {
                    jobs.remove(&plugin_id);
                }
                removed
            })
        };

        match removed {
            Some(job) => {
                log::debug!("Unscheduling {} ({})", schedule, job.job_id());
                job.remove();
                true
            }
            None => false,
        }
    }

    async fn plugin_is_loaded(&self, plugin_id: RecordId) -> SchedulerResult<bool> {
        let record = self
            .plugins
            .store()
            .get_plugin(plugin_id)
            .await
            .map_err(SchedulerError::from)?;
        Ok(record.is_some_and(|record| self.plugins.is_loaded(&record.key())))
    }

    fn register_job(&self, schedule: &Schedule) -> SchedulerResult<bool> {
        let trigger = match parse_schedule_trigger(&schedule.method, &schedule.method_config) {
            Ok(trigger) => trigger,
            Err(e) => {
                log::error!("Cannot schedule {}: {}", schedule, e);
                return Ok(false);
            }
        };

        let job_id = self.job_id(schedule.id);
        let handle = self
            .runner
            .add_job(&job_id, trigger, self.job_callback(schedule.id))?;
        log::info!("Scheduled {} as {}", schedule, job_id);

        let replaced = recover_mutex(self.jobs.lock())
            .entry(schedule.plugin_id)
            .or_default()
            .insert(schedule.id, handle);
        if let Some(replaced) = replaced {
            // the runner already replaced the job under this id
            log::debug!("Replaced job {}", replaced.job_id());
        }
        Ok(true)
    }

    fn job_callback(&self, schedule_id: ScheduleId) -> JobCallback {
        let me = self.me.clone();
        Arc::new(move || {
            let me = me.clone();
            async move {
                if let Some(manager) = me.upgrade() {
                    manager.trigger_schedule(schedule_id).await;
                }
            }
            .boxed()
        })
    }

    // Execution

    /// Run a schedule's command once
    ///
    /// Failures are logged and reported in the outcome, never returned.
    pub async fn trigger_schedule(&self, schedule_id: ScheduleId) -> TriggerOutcome {
        match self.run_schedule(schedule_id).await {
            Ok(TriggerOutcome::Skipped(reason)) => {
                log::warn!("Skipped schedule {}: {}", schedule_id, reason);
                TriggerOutcome::Skipped(reason)
            }
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Schedule {} failed: {}", schedule_id, e);
                TriggerOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run_schedule(&self, schedule_id: ScheduleId) -> SchedulerResult<TriggerOutcome> {
        let Some(schedule) = self.schedules.get_schedule(schedule_id).await? else {
            return Ok(TriggerOutcome::Skipped(format!(
                "schedule {} no longer exists",
                schedule_id
            )));
        };
        if !schedule.enabled {
            return Ok(TriggerOutcome::Skipped(format!("{} is disabled", schedule)));
        }

        let Some(instance) = self.plugins.get_plugin(schedule.plugin_id).await? else {
            return Ok(TriggerOutcome::Skipped(format!(
                "plugin {} of {} is not available",
                schedule.plugin_id, schedule
            )));
        };

        let command = instance.command(&schedule.command).ok_or_else(|| {
            PluginError::from(CommandError::NotFound {
                plugin: instance.key().to_string(),
                command: schedule.command.clone(),
            })
        })?;
        let kwargs = self
            .plugins
            .parse_command_kwargs(&command, &schedule.kwargs)
            .await
            .map_err(PluginError::from)?;

        log::debug!("Running {} on {}", schedule, instance.key());
        let result = command.execute(CommandCall { instance, kwargs }).await?;
        Ok(TriggerOutcome::Executed(result))
    }
}

#[async_trait]
impl LifecycleListener for ScheduleManager {
    async fn plugin_loaded(&self, record: &PluginRecord) {
        if let Err(e) = self.load_schedules(record).await {
            log::error!("Failed to load schedules of {}: {}", record, e);
        }
    }

    async fn plugin_unloaded(&self, record: &PluginRecord) {
        let removed = self.unload_schedules(record.id);
        log::debug!("Unloaded {} schedule(s) of {}", removed, record);
    }
}

#[async_trait]
impl ScheduleObserver for ScheduleManager {
    async fn schedule_saved(&self, schedule: &Schedule, created: bool) {
        log::trace!("{} saved (created: {})", schedule, created);
        if let Err(e) = self.reload_schedule(schedule).await {
            log::error!("Failed to reload {}: {}", schedule, e);
        }
    }

    async fn schedule_deleted(&self, schedule: &Schedule) {
        self.unload_schedule(schedule);
    }
}
