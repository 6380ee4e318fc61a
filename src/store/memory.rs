//! In-memory store
//!
//! Keeps plugin and schedule records in ordered maps behind one mutex.
//! Observers are notified after the mutex is released, in registration
//! order.

use super::error::Entity;
use super::{same_observer, PluginStore, ScheduleObserver, ScheduleStore, StoreError, StoreResult};
use crate::core::sync::{handle_mutex_poison, recover_read, recover_write};
use crate::plugin::types::{NewPlugin, PluginFilter, PluginRecord, RecordId};
use crate::scheduler::types::{NewSchedule, Schedule, ScheduleId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[derive(Default)]
struct MemoryState {
    plugins: BTreeMap<RecordId, PluginRecord>,
    schedules: BTreeMap<ScheduleId, Schedule>,
    next_plugin_id: RecordId,
    next_schedule_id: ScheduleId,
}

impl MemoryState {
    fn name_taken(&self, plugin_type: &str, name: &str, except: Option<RecordId>) -> bool {
        self.plugins.values().any(|p| {
            p.plugin_type == plugin_type && p.name == name && Some(p.id) != except
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    observers: RwLock<Vec<Arc<dyn ScheduleObserver>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        handle_mutex_poison(self.state.lock(), |message| StoreError::Backend { message })
    }

    fn observers(&self) -> Vec<Arc<dyn ScheduleObserver>> {
        recover_read(self.observers.read()).clone()
    }

    async fn notify_saved(&self, schedule: &Schedule, created: bool) {
        for observer in self.observers() {
            observer.schedule_saved(schedule, created).await;
        }
    }

    async fn notify_deleted(&self, schedule: &Schedule) {
        for observer in self.observers() {
            observer.schedule_deleted(schedule).await;
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (plugins, schedules) = match self.state.lock() {
            Ok(state) => (state.plugins.len(), state.schedules.len()),
            Err(_) => (0, 0),
        };
        f.debug_struct("MemoryStore")
            .field("plugins", &plugins)
            .field("schedules", &schedules)
            .finish()
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn get_plugin(&self, id: RecordId) -> StoreResult<Option<PluginRecord>> {
        Ok(self.state()?.plugins.get(&id).cloned())
    }

    async fn find_plugin(
        &self,
        plugin_type: &str,
        name: &str,
    ) -> StoreResult<Option<PluginRecord>> {
        Ok(self
            .state()?
            .plugins
            .values()
            .find(|p| p.plugin_type == plugin_type && p.name == name)
            .cloned())
    }

    async fn list_plugins(&self, filter: &PluginFilter) -> StoreResult<Vec<PluginRecord>> {
        Ok(self
            .state()?
            .plugins
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn create_plugin(&self, new: NewPlugin) -> StoreResult<PluginRecord> {
        let mut state = self.state()?;

        if state.name_taken(&new.plugin_type, &new.name, None) {
            return Err(StoreError::Conflict {
                message: format!(
                    "a {} plugin named '{}' already exists",
                    new.plugin_type, new.name
                ),
            });
        }

        let id = match new.id {
            Some(id) if state.plugins.contains_key(&id) => {
                return Err(StoreError::Conflict {
                    message: format!("plugin id {} is already in use", id),
                });
            }
            Some(id) => id,
            None => state.next_plugin_id + 1,
        };
        state.next_plugin_id = state.next_plugin_id.max(id);

        let record = PluginRecord {
            id,
            name: new.name,
            plugin_name: new.plugin_name,
            plugin_type: new.plugin_type,
            enabled: new.enabled,
            config: new.config,
            last_update: Utc::now(),
        };
        state.plugins.insert(id, record.clone());
        Ok(record)
    }

    async fn save_plugin(&self, record: &PluginRecord) -> StoreResult<PluginRecord> {
        let mut state = self.state()?;

        if !state.plugins.contains_key(&record.id) {
            return Err(StoreError::NotFound {
                entity: Entity::Plugin,
                id: record.id,
            });
        }
        if state.name_taken(&record.plugin_type, &record.name, Some(record.id)) {
            return Err(StoreError::Conflict {
                message: format!(
                    "a {} plugin named '{}' already exists",
                    record.plugin_type, record.name
                ),
            });
        }

        let mut saved = record.clone();
        saved.last_update = Utc::now();
        state.plugins.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn delete_plugin(&self, id: RecordId) -> StoreResult<()> {
        let cascaded: Vec<Schedule> = {
            let mut state = self.state()?;
            if state.plugins.remove(&id).is_none() {
                return Err(StoreError::NotFound {
                    entity: Entity::Plugin,
                    id,
                });
            }
            let schedule_ids: Vec<ScheduleId> = state
                .schedules
                .values()
                .filter(|s| s.plugin_id == id)
                .map(|s| s.id)
                .collect();
            schedule_ids
                .into_iter()
                .filter_map(|sid| state.schedules.remove(&sid))
                .collect()
        };

        for schedule in &cascaded {
            self.notify_deleted(schedule).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn get_schedule(&self, id: ScheduleId) -> StoreResult<Option<Schedule>> {
        Ok(self.state()?.schedules.get(&id).cloned())
    }

    async fn list_schedules(
        &self,
        plugin_id: RecordId,
        enabled: Option<bool>,
    ) -> StoreResult<Vec<Schedule>> {
        Ok(self
            .state()?
            .schedules
            .values()
            .filter(|s| s.plugin_id == plugin_id && enabled.is_none_or(|e| e == s.enabled))
            .cloned()
            .collect())
    }

    async fn find_schedule(
        &self,
        plugin_id: RecordId,
        plugin_unique_id: &str,
    ) -> StoreResult<Option<Schedule>> {
        Ok(self
            .state()?
            .schedules
            .values()
            .find(|s| {
                s.plugin_id == plugin_id && s.plugin_unique_id.as_deref() == Some(plugin_unique_id)
            })
            .cloned())
    }

    async fn create_schedule(&self, new: NewSchedule) -> StoreResult<Schedule> {
        let schedule = {
            let mut state = self.state()?;
            if !state.plugins.contains_key(&new.plugin_id) {
                return Err(StoreError::NotFound {
                    entity: Entity::Plugin,
                    id: new.plugin_id,
                });
            }

            state.next_schedule_id += 1;
            let schedule = Schedule {
                id: state.next_schedule_id,
                method: new.method,
                method_config: new.method_config,
                command: new.command,
                kwargs: new.kwargs,
                plugin_id: new.plugin_id,
                plugin_unique_id: new.plugin_unique_id,
                enabled: new.enabled,
            };
            state.schedules.insert(schedule.id, schedule.clone());
            schedule
        };

        self.notify_saved(&schedule, true).await;
        Ok(schedule)
    }

    async fn save_schedule(&self, schedule: &Schedule) -> StoreResult<Schedule> {
        {
            let mut state = self.state()?;
            if !state.schedules.contains_key(&schedule.id) {
                return Err(StoreError::NotFound {
                    entity: Entity::Schedule,
                    id: schedule.id,
                });
            }
            if !state.plugins.contains_key(&schedule.plugin_id) {
                return Err(StoreError::NotFound {
                    entity: Entity::Plugin,
                    id: schedule.plugin_id,
                });
            }
            state.schedules.insert(schedule.id, schedule.clone());
        }

        self.notify_saved(schedule, false).await;
        Ok(schedule.clone())
    }

    async fn delete_schedule(&self, id: ScheduleId) -> StoreResult<()> {
        let removed = self.state()?.schedules.remove(&id);
        match removed {
            Some(schedule) => {
                self.notify_deleted(&schedule).await;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: Entity::Schedule,
                id,
            }),
        }
    }

    fn add_observer(&self, observer: Arc<dyn ScheduleObserver>) {
        recover_write(self.observers.write()).push(observer);
    }

    fn remove_observer(&self, observer: &Arc<dyn ScheduleObserver>) {
        recover_write(self.observers.write()).retain(|o| !same_observer(o, observer));
    }
}
