//! In-memory key/value storage plugin

use crate::core::sync::recover_mutex;
use crate::plugin::builtin::{KV_TRAIT, STORAGE_TYPE};
use crate::plugin::commands::{Command, CommandCall};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::registry::PluginDescriptor;
use crate::plugin::schema::{ConfigValue, Field, Schema};
use crate::plugin::traits::{LivePlugin, Plugin, PluginInit};
use futures::future::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const MEMORY_PLUGIN: &str = "memory";

#[derive(Debug)]
pub struct MemoryStoragePlugin {
    namespace: String,
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStoragePlugin {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store `value`, returning the previous one
    pub fn set(&self, key: &str, value: Value) -> Option<Value> {
        recover_mutex(self.values.lock()).insert(key.to_string(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        recover_mutex(self.values.lock()).get(key).cloned()
    }

    /// Remove everything, returning how many entries there were
    pub fn clear(&self) -> usize {
        let mut values = recover_mutex(self.values.lock());
        let count = values.len();
        values.clear();
        count
    }

    pub fn len(&self) -> usize {
        recover_mutex(self.values.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Plugin for MemoryStoragePlugin {
    async fn ready(&self, instance: &LivePlugin) -> PluginResult<()> {
        log::debug!(
            "Memory storage {} ready with namespace '{}'",
            instance.name(),
            self.namespace
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn storage_of(instance: &LivePlugin) -> PluginResult<&MemoryStoragePlugin> {
    instance.downcast::<MemoryStoragePlugin>().ok_or_else(|| {
        PluginError::execution(instance.name(), "storage", "not a memory storage plugin")
    })
}

fn key_arg(call: &CommandCall) -> PluginResult<String> {
    call.arg("key")
        .and_then(ConfigValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| PluginError::execution(call.instance.name(), "storage", "missing key"))
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(STORAGE_TYPE, MEMORY_PLUGIN, |init: &PluginInit<'_>| {
        let namespace = init
            .config
            .get("namespace")
            .and_then(ConfigValue::as_str)
            .unwrap_or("default");
        let plugin: Box<dyn Plugin> = Box::new(MemoryStoragePlugin::new(namespace));
        Ok(plugin)
    })
    .with_schema(Schema::new().field(Field::string("namespace").default(json!("default"))))
    .with_traits([KV_TRAIT])
    .with_command(
        Command::new("set", |call: CommandCall| {
            async move {
                let key = key_arg(&call)?;
                let value = call.arg("value").map(ConfigValue::to_json).unwrap_or(Value::Null);
                let previous = storage_of(&call.instance)?.set(&key, value);
                Ok::<_, PluginError>(previous.unwrap_or(Value::Null))
            }
            .boxed()
        })
        .with_display_name("Set value")
        .with_schema(
            Schema::new()
                .field(Field::string("key").required())
                .field(Field::any("value").required()),
        ),
    )
    .with_command(
        Command::new("get", |call: CommandCall| {
            async move {
                let key = key_arg(&call)?;
                let value = storage_of(&call.instance)?.get(&key);
                Ok::<_, PluginError>(value.unwrap_or(Value::Null))
            }
            .boxed()
        })
        .with_display_name("Get value")
        .with_schema(Schema::new().field(Field::string("key").required())),
    )
    .with_command(
        Command::new("clear", |call: CommandCall| {
            async move {
                let cleared = storage_of(&call.instance)?.clear();
                Ok::<_, PluginError>(json!({ "cleared": cleared }))
            }
            .boxed()
        })
        .with_display_name("Clear storage"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let storage = MemoryStoragePlugin::new("default");
        assert_eq!(storage.set("a", json!(1)), None);
        assert_eq!(storage.set("a", json!(2)), Some(json!(1)));
        assert_eq!(storage.get("a"), Some(json!(2)));
        assert_eq!(storage.clear(), 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_descriptor_declares_commands() {
        let descriptor = descriptor();
        assert_eq!(descriptor.commands().names(), vec!["set", "get", "clear"]);
        assert!(descriptor.traits().contains(KV_TRAIT));
    }
}
