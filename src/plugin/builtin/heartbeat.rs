//! Heartbeat service plugin
//!
//! Logs a message each time its `beat` command runs, typically from a
//! schedule, and records the time of the last beat in an optional storage
//! plugin.

use crate::plugin::builtin::memory::MemoryStoragePlugin;
use crate::plugin::builtin::{KV_TRAIT, SERVICE_TYPE, STORAGE_TYPE};
use crate::plugin::cache::PluginHandle;
use crate::plugin::commands::{Command, CommandCall};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::registry::PluginDescriptor;
use crate::plugin::schema::{ConfigValue, Field, PluginReference, Schema};
use crate::plugin::traits::{LivePlugin, Plugin, PluginInit};
use chrono::Utc;
use futures::future::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

pub const HEARTBEAT_PLUGIN: &str = "heartbeat";

/// Storage key written on every beat
pub const LAST_BEAT_KEY: &str = "last_beat";

#[derive(Debug)]
pub struct HeartbeatPlugin {
    message: String,
    storage: Option<PluginHandle>,
    beats: AtomicU64,
}

impl HeartbeatPlugin {
    pub fn new(message: impl Into<String>, storage: Option<PluginHandle>) -> Self {
        Self {
            message: message.into(),
            storage,
            beats: AtomicU64::new(0),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn storage(&self) -> Option<&PluginHandle> {
        self.storage.as_ref()
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    /// Count a beat and persist its time; returns the new count
    pub fn beat(&self, name: &str) -> u64 {
        let count = self.beats.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("{}: {} (beat {})", name, self.message, count);

        if let Some(handle) = &self.storage {
            match handle.resolve() {
                Some(storage) => match storage.downcast::<MemoryStoragePlugin>() {
                    Some(storage) => {
                        storage.set(LAST_BEAT_KEY, json!(Utc::now().to_rfc3339()));
                    }
                    None => log::warn!("{}: storage {} does not accept writes", name, handle),
                },
                None => log::warn!("{}: storage {} is not loaded", name, handle),
            }
        }
        count
    }
}

#[async_trait::async_trait]
impl Plugin for HeartbeatPlugin {
    async fn ready(&self, instance: &LivePlugin) -> PluginResult<()> {
        log::info!("Mounted heartbeat {}", instance.name());
        Ok(())
    }

    async fn unload(&self, instance: &LivePlugin) -> PluginResult<()> {
        log::info!(
            "Unmounted heartbeat {} after {} beat(s)",
            instance.name(),
            self.beats()
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(SERVICE_TYPE, HEARTBEAT_PLUGIN, |init: &PluginInit<'_>| {
        let message = init
            .config
            .get("message")
            .and_then(ConfigValue::as_str)
            .unwrap_or("alive");
        let storage = init
            .config
            .get("storage")
            .and_then(ConfigValue::as_plugin)
            .cloned();
        let plugin: Box<dyn Plugin> = Box::new(HeartbeatPlugin::new(message, storage));
        Ok(plugin)
    })
    .with_schema(
        Schema::new()
            .field(Field::string("message").default(json!("alive")))
            .field(
                Field::plugin(
                    "storage",
                    PluginReference::of_type(STORAGE_TYPE).with_traits([KV_TRAIT]),
                )
                .nullable(),
            ),
    )
    .with_command(
        Command::new("beat", |call: CommandCall| {
            async move {
                let heartbeat = call
                    .instance
                    .downcast::<HeartbeatPlugin>()
                    .ok_or_else(|| {
                        PluginError::execution(call.instance.name(), "beat", "not a heartbeat plugin")
                    })?;
                let count = heartbeat.beat(call.instance.name());
                Ok::<Value, PluginError>(json!({
                    "beats": count,
                    "message": heartbeat.message(),
                }))
            }
            .boxed()
        })
        .with_display_name("Beat")
        .with_description("Log the heartbeat message once"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_counts_without_storage() {
        let heartbeat = HeartbeatPlugin::new("still here", None);
        assert_eq!(heartbeat.beat("hb"), 1);
        assert_eq!(heartbeat.beat("hb"), 2);
        assert_eq!(heartbeat.beats(), 2);
    }

    #[test]
    fn test_descriptor_schema_and_commands() {
        let descriptor = descriptor();
        assert_eq!(descriptor.plugin_type(), SERVICE_TYPE);
        assert!(descriptor.commands().get("beat").is_some());
        assert_eq!(descriptor.schema().fields().len(), 2);
    }
}
