//! Common test utilities and helpers
//!
//! Builders for managers over a fresh memory store and a small external
//! plugin implementation, all through the public API.

#![allow(dead_code)]

use plugrack::plugin::api::{
    register_builtin_plugins, LivePlugin, MemoryPermissions, NewPlugin, Plugin, PluginDescriptor,
    Field, PluginInit, PluginManager, PluginRecord, PluginReference, PluginResult, Schema,
};
use plugrack::store::{MemoryStore, PluginStore};
use std::any::Any;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Manager with the built-in plugins registered
pub fn builtin_manager() -> (Arc<PluginManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = PluginManager::new(store.clone(), Arc::new(MemoryPermissions::new()));
    register_builtin_plugins(&manager).unwrap();
    (Arc::new(manager), store)
}

pub async fn seed(store: &MemoryStore, new: NewPlugin) -> PluginRecord {
    store.create_plugin(new).await.unwrap()
}

/// Service plugin counting how often it was built and torn down
///
/// Its config takes an optional `storage` reference to a kv storage.
#[derive(Debug, Default)]
pub struct WatchCounters {
    pub built: AtomicUsize,
    pub unloaded: Arc<AtomicUsize>,
}

struct WatcherPlugin {
    unloaded: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Plugin for WatcherPlugin {
    async fn unload(&self, _instance: &LivePlugin) -> PluginResult<()> {
        self.unloaded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn watcher_descriptor(counters: Arc<WatchCounters>) -> PluginDescriptor {
    PluginDescriptor::new("service", "watcher", move |_init: &PluginInit<'_>| {
        counters.built.fetch_add(1, Ordering::SeqCst);
        let plugin: Box<dyn Plugin> = Box::new(WatcherPlugin {
            unloaded: counters.unloaded.clone(),
        });
        Ok(plugin)
    })
    .with_schema(Schema::new().field(
        Field::plugin(
            "storage",
            PluginReference::of_type("storage").with_traits(["kv"]),
        )
        .nullable(),
    ))
}

/// Write `contents` to a config file inside `dir`
pub fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("plugrack.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}
