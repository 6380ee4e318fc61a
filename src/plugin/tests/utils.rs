//! Plugin Test Utilities
//!
//! Mock plugins and helpers shared across test modules.

use crate::plugin::cache::PluginCache;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::manager::PluginManager;
use crate::plugin::permission::{MemoryPermissions, Permission};
use crate::plugin::registry::{PluginDescriptor, PluginTypeDescriptor};
use crate::plugin::schema::ConfigValue;
use crate::plugin::traits::{LivePlugin, Plugin, PluginInit};
use crate::plugin::types::{NewPlugin, PluginRecord};
use crate::store::{MemoryStore, PluginStore};
use chrono::Utc;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Knobs and counters shared by every instance a mock descriptor builds
#[derive(Debug, Clone, Default)]
pub struct MockBehaviour {
    pub constructions: Arc<AtomicUsize>,
    pub readies: Arc<AtomicUsize>,
    pub unloads: Arc<AtomicUsize>,
    pub ready_delay: Duration,
    pub fail_construct: bool,
    pub fail_ready: bool,
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    pub fn failing_construct(mut self) -> Self {
        self.fail_construct = true;
        self
    }

    pub fn failing_ready(mut self) -> Self {
        self.fail_ready = true;
        self
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn readies(&self) -> usize {
        self.readies.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

/// Configurable mock plugin
#[derive(Debug)]
pub struct MockPlugin {
    pub name: String,
    pub behaviour: MockBehaviour,
}

#[async_trait::async_trait]
impl Plugin for MockPlugin {
    async fn ready(&self, instance: &LivePlugin) -> PluginResult<()> {
        if !self.behaviour.ready_delay.is_zero() {
            tokio::time::sleep(self.behaviour.ready_delay).await;
        }
        if self.behaviour.fail_ready {
            return Err(PluginError::execution(
                instance.name(),
                "ready",
                "Mock ready failure",
            ));
        }
        self.behaviour.readies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self, _instance: &LivePlugin) -> PluginResult<()> {
        self.behaviour.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Descriptor building `MockPlugin`s that report to `behaviour`
pub fn behaviour_descriptor(
    plugin_type: &str,
    plugin_name: &str,
    behaviour: MockBehaviour,
) -> PluginDescriptor {
    PluginDescriptor::new(plugin_type, plugin_name, move |init: &PluginInit<'_>| {
        behaviour.constructions.fetch_add(1, Ordering::SeqCst);
        if behaviour.fail_construct {
            return Err(PluginError::construction(init.key, "Mock construction failure"));
        }
        let plugin: Box<dyn Plugin> = Box::new(MockPlugin {
            name: init.key.name.clone(),
            behaviour: behaviour.clone(),
        });
        Ok(plugin)
    })
}

pub fn mock_descriptor(plugin_type: &str, plugin_name: &str) -> PluginDescriptor {
    behaviour_descriptor(plugin_type, plugin_name, MockBehaviour::new())
}

pub fn record(id: i64, plugin_type: &str, plugin_name: &str, name: &str) -> PluginRecord {
    PluginRecord {
        id,
        name: name.to_string(),
        plugin_name: plugin_name.to_string(),
        plugin_type: plugin_type.to_string(),
        enabled: true,
        config: serde_json::json!({}),
        last_update: Utc::now(),
    }
}

/// A live instance built outside any manager, published nowhere
pub fn live_plugin(cache: &PluginCache, plugin_type: &str, name: &str) -> Arc<LivePlugin> {
    let record = record(1, plugin_type, "mock", name);
    let key = record.key();
    Arc::new(LivePlugin::new(
        record,
        Arc::new(mock_descriptor(plugin_type, "mock")),
        Permission {
            id: 0,
            codename: key.permission_codename(),
            display_name: format!("Can access {}", key),
        },
        ConfigValue::empty_map(),
        cache.handle(key.clone()),
        Box::new(MockPlugin {
            name: name.to_string(),
            behaviour: MockBehaviour::new(),
        }),
    ))
}

/// Manager over a fresh memory store with `storage` (trait `kv`) and
/// `service` types registered
pub struct TestEnv {
    pub manager: Arc<PluginManager>,
    pub store: Arc<MemoryStore>,
    pub permissions: Arc<MemoryPermissions>,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let permissions = Arc::new(MemoryPermissions::new());
        let manager = PluginManager::new(store.clone(), permissions.clone());
        manager
            .register_type(PluginTypeDescriptor::new("storage").with_required_traits(["kv"]))
            .unwrap();
        manager
            .register_type(PluginTypeDescriptor::new("service"))
            .unwrap();
        Self {
            manager: Arc::new(manager),
            store,
            permissions,
        }
    }

    pub fn register(&self, descriptor: PluginDescriptor) {
        self.manager.register(descriptor).unwrap();
    }

    pub async fn seed(&self, new: NewPlugin) -> PluginRecord {
        self.store.create_plugin(new).await.unwrap()
    }
}
