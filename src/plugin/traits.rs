//! Plugin Trait System
//!
//! The `Plugin` trait implemented by plugin authors and the `LivePlugin`
//! wrapper the lifecycle manager builds around each loaded instance.
//!
//! # Plugin Architecture
//!
//! A plugin implementation is registered once per `(plugin_type,
//! plugin_name)` as a `PluginDescriptor`. Each stored record using that
//! implementation becomes its own `LivePlugin` when loaded: it carries the
//! record snapshot, the validated configuration, the access permission and
//! the back-references of plugins that point at it.
//!
//! Plugins never construct each other. References to other plugins arrive
//! as `PluginHandle`s inside the configuration and are resolved on use.

use crate::core::sync::recover_mutex;
use crate::plugin::cache::PluginHandle;
use crate::plugin::commands::Command;
use crate::plugin::error::PluginResult;
use crate::plugin::permission::Permission;
use crate::plugin::registry::PluginDescriptor;
use crate::plugin::schema::ConfigValue;
use crate::plugin::types::{PluginKey, PluginRecord};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Behaviour of a plugin implementation
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called once the instance is fully built, before it is published
    ///
    /// An error aborts the load.
    async fn ready(&self, _instance: &LivePlugin) -> PluginResult<()> {
        Ok(())
    }

    /// Called after the instance has left the cache
    async fn unload(&self, _instance: &LivePlugin) -> PluginResult<()> {
        Ok(())
    }

    /// Access to the concrete type for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Inputs handed to a plugin constructor
#[derive(Debug, Clone, Copy)]
pub struct PluginInit<'a> {
    pub key: &'a PluginKey,
    pub record: &'a PluginRecord,
    pub config: &'a ConfigValue,
}

/// Builds the implementation object for one record
pub type PluginConstructor =
    Arc<dyn Fn(&PluginInit<'_>) -> PluginResult<Box<dyn Plugin>> + Send + Sync>;

/// A loaded plugin instance
pub struct LivePlugin {
    key: PluginKey,
    record: PluginRecord,
    descriptor: Arc<PluginDescriptor>,
    permission: Permission,
    config: ConfigValue,
    handle: PluginHandle,
    related: Mutex<Vec<PluginHandle>>,
    plugin: Box<dyn Plugin>,
}

impl fmt::Debug for LivePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivePlugin")
            .field("key", &self.key)
            .field("record_id", &self.record.id)
            .field("plugin_name", &self.record.plugin_name)
            .field("related", &self.related_plugins())
            .finish()
    }
}

impl LivePlugin {
    pub(crate) fn new(
        record: PluginRecord,
        descriptor: Arc<PluginDescriptor>,
        permission: Permission,
        config: ConfigValue,
        handle: PluginHandle,
        plugin: Box<dyn Plugin>,
    ) -> Self {
        Self {
            key: record.key(),
            record,
            descriptor,
            permission,
            config,
            handle,
            related: Mutex::new(Vec::new()),
            plugin,
        }
    }

    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn plugin_type(&self) -> &str {
        &self.key.plugin_type
    }

    /// Record snapshot taken when the instance was built
    pub fn record(&self) -> &PluginRecord {
        &self.record
    }

    pub fn descriptor(&self) -> &Arc<PluginDescriptor> {
        &self.descriptor
    }

    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    pub fn config(&self) -> &ConfigValue {
        &self.config
    }

    /// Handle referring to this instance
    pub fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// The implementation object as `T`, if it is one
    pub fn downcast<T: Plugin>(&self) -> Option<&T> {
        self.plugin.as_any().downcast_ref::<T>()
    }

    pub fn command(&self, name: &str) -> Option<Arc<Command>> {
        self.descriptor.commands().get(name)
    }

    pub fn has_trait(&self, name: &str) -> bool {
        self.descriptor.traits().contains(name)
    }

    /// Plugins whose configuration references this one
    pub fn related_plugins(&self) -> Vec<PluginHandle> {
        recover_mutex(self.related.lock()).clone()
    }

    /// Record a referrer; returns false when it was already present
    pub fn add_related(&self, handle: PluginHandle) -> bool {
        let mut related = recover_mutex(self.related.lock());
        if related.contains(&handle) {
            return false;
        }
        related.push(handle);
        true
    }

    /// Drop the referrer `key`; returns whether it was present
    pub fn remove_related(&self, key: &PluginKey) -> bool {
        let mut related = recover_mutex(self.related.lock());
        let before = related.len();
        related.retain(|h| h.key() != key);
        related.len() != before
    }

    pub(crate) async fn ready(&self) -> PluginResult<()> {
        self.plugin.ready(self).await
    }

    pub(crate) async fn unload(&self) -> PluginResult<()> {
        self.plugin.unload(self).await
    }
}

impl fmt::Display for LivePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.record)
    }
}

#[cfg(test)]
mod tests {
    use crate::plugin::cache::PluginCache;
    use crate::plugin::tests::utils::{live_plugin, MockPlugin};
    use crate::plugin::types::PluginKey;

    #[test]
    fn test_related_edges_are_idempotent() {
        let cache = PluginCache::new();
        let storage = live_plugin(&cache, "storage", "primary");
        let referrer = cache.handle(PluginKey::new("service", "api"));

        assert!(storage.add_related(referrer.clone()));
        assert!(!storage.add_related(referrer.clone()));
        assert_eq!(storage.related_plugins().len(), 1);

        assert!(storage.remove_related(referrer.key()));
        assert!(!storage.remove_related(referrer.key()));
        assert!(storage.related_plugins().is_empty());
    }

    #[test]
    fn test_downcast_to_implementation() {
        let cache = PluginCache::new();
        let instance = live_plugin(&cache, "storage", "primary");
        assert!(instance.downcast::<MockPlugin>().is_some());
        assert_eq!(instance.to_string(), "primary using storage");
    }
}
