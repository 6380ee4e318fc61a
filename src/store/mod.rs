//! Storage collaborator
//!
//! Plugin and schedule records are persisted outside the core. The core
//! talks to storage through the async traits defined here and treats every
//! call as synchronous and immediately consistent. `MemoryStore` is the
//! in-process implementation used by the binary and the test suites.

mod error;
mod memory;

pub use error::{Entity, StoreError, StoreResult};
pub use memory::MemoryStore;

use crate::plugin::types::{NewPlugin, PluginFilter, PluginRecord, RecordId};
use crate::scheduler::types::{NewSchedule, Schedule, ScheduleId};
use async_trait::async_trait;
use std::sync::Arc;

/// Access to stored plugin records
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn get_plugin(&self, id: RecordId) -> StoreResult<Option<PluginRecord>>;

    async fn find_plugin(&self, plugin_type: &str, name: &str)
        -> StoreResult<Option<PluginRecord>>;

    /// Records matching `filter`, ordered by id
    async fn list_plugins(&self, filter: &PluginFilter) -> StoreResult<Vec<PluginRecord>>;

    /// Fails with `Conflict` when `(name, plugin_type)` is taken
    async fn create_plugin(&self, new: NewPlugin) -> StoreResult<PluginRecord>;

    /// Persist changes and bump `last_update`
    async fn save_plugin(&self, record: &PluginRecord) -> StoreResult<PluginRecord>;

    /// Delete a record and cascade to its schedules
    async fn delete_plugin(&self, id: RecordId) -> StoreResult<()>;
}

/// Receives schedule change notifications from a `ScheduleStore`
#[async_trait]
pub trait ScheduleObserver: Send + Sync {
    async fn schedule_saved(&self, schedule: &Schedule, created: bool);

    async fn schedule_deleted(&self, schedule: &Schedule);
}

/// Access to stored schedules
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_schedule(&self, id: ScheduleId) -> StoreResult<Option<Schedule>>;

    /// Schedules of one plugin; `enabled: None` returns all of them
    async fn list_schedules(
        &self,
        plugin_id: RecordId,
        enabled: Option<bool>,
    ) -> StoreResult<Vec<Schedule>>;

    async fn find_schedule(
        &self,
        plugin_id: RecordId,
        plugin_unique_id: &str,
    ) -> StoreResult<Option<Schedule>>;

    async fn create_schedule(&self, new: NewSchedule) -> StoreResult<Schedule>;

    async fn save_schedule(&self, schedule: &Schedule) -> StoreResult<Schedule>;

    async fn delete_schedule(&self, id: ScheduleId) -> StoreResult<()>;

    fn add_observer(&self, observer: Arc<dyn ScheduleObserver>);

    fn remove_observer(&self, observer: &Arc<dyn ScheduleObserver>);

    /// Create or update the schedule a plugin owns under `plugin_unique_id`
    ///
    /// An existing schedule is only saved when one of its fields differs or
    /// it was disabled. New schedules are created enabled.
    async fn ensure_schedule(&self, spec: NewSchedule) -> StoreResult<Schedule> {
        let Some(unique_id) = spec.plugin_unique_id.clone() else {
            return Err(StoreError::Invalid {
                message: "ensure_schedule requires a plugin_unique_id".to_string(),
            });
        };

        match self.find_schedule(spec.plugin_id, &unique_id).await? {
            Some(mut existing) => {
                if existing.apply_spec(&spec) {
                    log::debug!("Updating ensured {}", existing);
                    self.save_schedule(&existing).await
                } else {
                    Ok(existing)
                }
            }
            None => self.create_schedule(spec.with_enabled(true)).await,
        }
    }
}

/// Compare observers by allocation, ignoring vtable identity
pub(crate) fn same_observer(a: &Arc<dyn ScheduleObserver>, b: &Arc<dyn ScheduleObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
