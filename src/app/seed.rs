//! Seeding the in-memory store from configuration

use crate::core::config::SeedSettings;
use crate::plugin::api::NewPlugin;
use crate::scheduler::api::NewSchedule;
use crate::store::{MemoryStore, PluginStore, ScheduleStore, StoreError, StoreResult};

/// Counts of seeded records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub plugins: usize,
    pub schedules: usize,
}

/// Insert the configured plugins, then their schedules
///
/// Schedules with a `plugin_unique_id` go through `ensure_schedule`, so
/// seeding the same store twice does not duplicate them.
pub async fn seed_store(store: &MemoryStore, seed: &SeedSettings) -> StoreResult<SeedSummary> {
    let mut summary = SeedSummary::default();

    for plugin in &seed.plugins {
        let mut new = NewPlugin::new(&plugin.plugin_type, &plugin.plugin_name, &plugin.name)
            .with_config(plugin.config.clone())
            .with_enabled(plugin.enabled);
        if let Some(id) = plugin.id {
            new = new.with_id(id);
        }
        let record = store.create_plugin(new).await?;
        log::debug!("Seeded {}", record);
        summary.plugins += 1;
    }

    for schedule in &seed.schedules {
        let record = store
            .find_plugin(&schedule.plugin_type, &schedule.plugin)
            .await?
            .ok_or_else(|| StoreError::Invalid {
                message: format!(
                    "schedule references unknown plugin {}:{}",
                    schedule.plugin_type, schedule.plugin
                ),
            })?;

        let new = NewSchedule::new(
            record.id,
            &schedule.method,
            &schedule.method_config,
            &schedule.command,
        )
        .with_kwargs(schedule.kwargs.clone())
        .with_enabled(schedule.enabled);

        let created = match &schedule.plugin_unique_id {
            Some(unique_id) => {
                let mut ensured = store.ensure_schedule(new.with_unique_id(unique_id)).await?;
                // ensured schedules come back enabled
                if !schedule.enabled {
                    ensured.enabled = false;
                    ensured = store.save_schedule(&ensured).await?;
                }
                ensured
            }
            None => store.create_schedule(new).await?,
        };
        log::debug!("Seeded {}", created);
        summary.schedules += 1;
    }

    Ok(summary)
}
