//! Plugin Lifecycle Manager
//!
//! Loads stored plugin records into live instances, links instances that
//! reference each other, and tears them down again. Construction of one
//! identity is single-flight: concurrent callers share the instance built
//! by whichever caller got there first.

use crate::core::sync::{handle_rwlock_write, recover_read, recover_write};
use crate::plugin::cache::{PluginCache, PluginHandle};
use crate::plugin::commands::{Command, CommandResult};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::events::{same_listener, LifecycleListener};
use crate::plugin::lock::{ConstructionLocks, Flight};
use crate::plugin::permission::{Permission, PermissionProvider};
use crate::plugin::registry::{PluginDescriptor, PluginTypeDescriptor, PluginTypeRegistry};
use crate::plugin::schema::{ConfigValue, PluginReference, ReferenceResolver};
use crate::plugin::traits::{LivePlugin, PluginInit};
use crate::plugin::types::{PluginFilter, PluginKey, PluginRecord, RecordId};
use crate::store::PluginStore;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Plugin types loaded by `bootstrap` when no order is configured
pub const DEFAULT_INITIALIZATION_ORDER: &[&str] = &["storage", "service"];

pub struct PluginManager {
    registry: RwLock<PluginTypeRegistry>,
    cache: PluginCache,
    locks: ConstructionLocks,
    store: Arc<dyn PluginStore>,
    permissions: Arc<dyn PermissionProvider>,
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    initialization_order: Vec<String>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("loaded", &self.cache.keys())
            .field("initialization_order", &self.initialization_order)
            .finish()
    }
}

impl PluginManager {
    pub fn new(store: Arc<dyn PluginStore>, permissions: Arc<dyn PermissionProvider>) -> Self {
        Self {
            registry: RwLock::new(PluginTypeRegistry::new()),
            cache: PluginCache::new(),
            locks: ConstructionLocks::new(),
            store,
            permissions,
            listeners: RwLock::new(Vec::new()),
            initialization_order: DEFAULT_INITIALIZATION_ORDER
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }

    pub fn with_initialization_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initialization_order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn initialization_order(&self) -> &[String] {
        &self.initialization_order
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.store
    }

    pub fn cache(&self) -> &PluginCache {
        &self.cache
    }

    // Registry

    pub fn register_type(&self, descriptor: PluginTypeDescriptor) -> PluginResult<()> {
        let mut registry = handle_rwlock_write(self.registry.write(), |message| PluginError::Sync {
            message: format!("Plugin registry unavailable: {}", message),
        })?;
        registry.register_type(descriptor);
        Ok(())
    }

    pub fn register(&self, descriptor: PluginDescriptor) -> PluginResult<()> {
        let mut registry = handle_rwlock_write(self.registry.write(), |message| PluginError::Sync {
            message: format!("Plugin registry unavailable: {}", message),
        })?;
        registry.register(descriptor)
    }

    pub fn descriptor(&self, plugin_type: &str, plugin_name: &str) -> Option<Arc<PluginDescriptor>> {
        recover_read(self.registry.read()).get(plugin_type, plugin_name)
    }

    /// Run `f` against the registry under its read lock
    pub fn with_registry<R>(&self, f: impl FnOnce(&PluginTypeRegistry) -> R) -> R {
        f(&recover_read(self.registry.read()))
    }

    // Listeners

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        recover_write(self.listeners.write()).push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        recover_write(self.listeners.write()).retain(|l| !same_listener(l, listener));
    }

    fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        recover_read(self.listeners.read()).clone()
    }

    async fn emit_loaded(&self, record: &PluginRecord) {
        for listener in self.listeners() {
            listener.plugin_loaded(record).await;
        }
    }

    async fn emit_unloaded(&self, record: &PluginRecord) {
        for listener in self.listeners() {
            listener.plugin_unloaded(record).await;
        }
    }

    // Lookups

    pub fn is_loaded(&self, key: &PluginKey) -> bool {
        self.cache.contains(key)
    }

    pub fn loaded_keys(&self) -> Vec<PluginKey> {
        self.cache.keys()
    }

    pub fn lookup(&self, key: &PluginKey) -> Option<Arc<LivePlugin>> {
        self.cache.lookup(key)
    }

    /// Loaded instance of a stored plugin, constructing it if needed
    ///
    /// `Ok(None)` when no such record exists or no implementation is
    /// registered for it.
    pub async fn get_or_create(
        &self,
        plugin_type: &str,
        name: &str,
    ) -> PluginResult<Option<Arc<LivePlugin>>> {
        match self.store.find_plugin(plugin_type, name).await? {
            Some(record) => self.get_or_create_record(&record).await,
            None => Ok(None),
        }
    }

    pub async fn get_or_create_record(
        &self,
        record: &PluginRecord,
    ) -> PluginResult<Option<Arc<LivePlugin>>> {
        self.get_or_create_in(record.clone(), Vec::new()).await
    }

    /// `chain` holds the keys whose construction is waiting on this one
    fn get_or_create_in(
        &self,
        record: PluginRecord,
        chain: Vec<PluginKey>,
    ) -> BoxFuture<'_, PluginResult<Option<Arc<LivePlugin>>>> {
        async move {
            let key = record.key();
            if let Some(existing) = self.cache.lookup(&key) {
                return Ok(Some(existing));
            }

            match self.locks.acquire_in(&key, &chain).await {
                Flight::Cycle(cycle) => Err(PluginError::construction(
                    &key,
                    format!("Circular plugin reference: {}.", join_keys(&cycle)),
                )),
                Flight::Leader(_guard) => {
                    if let Some(existing) = self.cache.lookup(&key) {
                        return Ok(Some(existing));
                    }
                    self.construct(record, chain).await
                }
                Flight::Follower => {
                    if let Some(existing) = self.cache.lookup(&key) {
                        return Ok(Some(existing));
                    }
                    if self
                        .descriptor(&record.plugin_type, &record.plugin_name)
                        .is_none()
                    {
                        return Ok(None);
                    }
                    Err(PluginError::construction(
                        &key,
                        "construction by a concurrent caller did not succeed",
                    ))
                }
            }
        }
        .boxed()
    }

    async fn construct(
        &self,
        record: PluginRecord,
        mut chain: Vec<PluginKey>,
    ) -> PluginResult<Option<Arc<LivePlugin>>> {
        let key = record.key();
        let Some(descriptor) = self.descriptor(&record.plugin_type, &record.plugin_name) else {
            log::warn!(
                "No plugin '{}' registered for type '{}', cannot load {}",
                record.plugin_name,
                record.plugin_type,
                key
            );
            return Ok(None);
        };

        log::debug!("Constructing {} with '{}'", key, record.plugin_name);
        let handle = self.cache.handle(key.clone());

        chain.push(key.clone());
        let resolver = ConstructionResolver {
            manager: self,
            chain: &chain,
        };
        let config = descriptor
            .schema()
            .load(&record.config, &resolver)
            .await
            .map_err(|source| PluginError::InvalidConfig {
                key: key.clone(),
                source,
            })?;

        let linked = link_references(&config, &handle);

        match self.publish(record, descriptor, config, handle).await {
            Ok(instance) => {
                log::info!("Loaded plugin {}", instance.key());
                Ok(Some(instance))
            }
            Err(e) => {
                for target in linked {
                    target.remove_related(&key);
                }
                log::warn!("Failed to load plugin {}: {}", key, e);
                Err(e)
            }
        }
    }

    async fn publish(
        &self,
        record: PluginRecord,
        descriptor: Arc<PluginDescriptor>,
        config: ConfigValue,
        handle: PluginHandle,
    ) -> PluginResult<Arc<LivePlugin>> {
        let key = record.key();
        let codename = key.permission_codename();
        let permission = self
            .permissions
            .get_or_create_permission(
                &codename,
                &format!("Can access plugin_type:{} name:{}", key.plugin_type, key.name),
            )
            .await
            .map_err(|cause| PluginError::Permission { codename, cause })?;

        let plugin = descriptor.construct(&PluginInit {
            key: &key,
            record: &record,
            config: &config,
        })?;

        let instance = Arc::new(LivePlugin::new(
            record, descriptor, permission, config, handle, plugin,
        ));
        instance.ready().await?;
        self.cache.add(instance.clone())?;
        self.adopt_referrers(&instance);
        self.emit_loaded(instance.record()).await;

        Ok(instance)
    }

    /// Link already loaded instances whose config references `instance`
    fn adopt_referrers(&self, instance: &LivePlugin) {
        for loaded in self.cache.list_loaded() {
            if loaded.key() == instance.key() {
                continue;
            }
            let references = loaded.config().plugin_references();
            if references.iter().any(|h| h.key() == instance.key()) {
                instance.add_related(loaded.handle().clone());
            }
        }
    }

    /// Unload a plugin; `Ok(false)` when it was not loaded
    pub async fn remove(&self, key: &PluginKey) -> PluginResult<bool> {
        if !self.cache.contains(key) {
            return Ok(false);
        }

        let _guard = self.locks.acquire_exclusive(key).await;
        let Some(instance) = self.cache.lookup(key) else {
            return Ok(false);
        };
        log::debug!("Removing plugin {}", key);

        let teardown = TeardownResolver { manager: self };
        let references = match instance
            .descriptor()
            .schema()
            .load(&instance.record().config, &teardown)
            .await
        {
            Ok(config) => config.plugin_references(),
            Err(e) => {
                log::warn!(
                    "Could not reload config of {} for teardown, using the loaded config: {}",
                    key,
                    e
                );
                instance.config().plugin_references()
            }
        };
        for target in references {
            if let Some(live) = target.resolve() {
                live.remove_related(key);
            }
        }

        self.emit_unloaded(instance.record()).await;
        self.cache.remove(key);
        instance.unload().await?;
        log::info!("Unloaded plugin {}", key);
        Ok(true)
    }

    /// Unload then load again from `record`
    ///
    /// The instance loaded for the same record id is removed even when the
    /// record was renamed or moved to another type.
    pub async fn reload(&self, record: &PluginRecord) -> PluginResult<Option<Arc<LivePlugin>>> {
        let mut stale: Vec<PluginKey> = self
            .cache
            .list_loaded()
            .iter()
            .filter(|instance| instance.record().id == record.id)
            .map(|instance| instance.key().clone())
            .collect();
        let key = record.key();
        if !stale.contains(&key) {
            stale.push(key);
        }
        for key in &stale {
            self.remove(key).await?;
        }
        self.get_or_create_record(record).await
    }

    /// Load every enabled record, type by type in initialization order
    ///
    /// A construction error aborts; a record without a registered
    /// implementation is skipped. Returns the number of plugins loaded.
    pub async fn bootstrap(&self) -> PluginResult<usize> {
        let mut loaded = 0;
        for plugin_type in &self.initialization_order {
            let records = self
                .store
                .list_plugins(&PluginFilter::enabled_of_type(plugin_type.as_str()))
                .await?;
            log::debug!("Bootstrapping {} {} plugin(s)", records.len(), plugin_type);

            for record in records {
                match self.get_or_create_record(&record).await? {
                    Some(_) => loaded += 1,
                    None => log::warn!("Skipping {}: no implementation registered", record),
                }
            }
        }
        log::info!("Bootstrap loaded {} plugin(s)", loaded);
        Ok(loaded)
    }

    /// Unload everything, most recently loaded first
    pub async fn unload_all(&self) {
        let loaded = self.cache.list_loaded();
        for instance in loaded.iter().rev() {
            if let Err(e) = self.remove(instance.key()).await {
                log::error!("Failed to unload {}: {}", instance.key(), e);
            }
        }
        self.cache.clear();
    }

    /// Whether `record` is loaded or can be loaded now
    pub async fn can_load(&self, record: &PluginRecord) -> bool {
        if self.cache.contains(&record.key()) {
            return true;
        }
        match self.get_or_create_record(record).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                log::error!("Cannot load {}: {}", record, e);
                false
            }
        }
    }

    /// Loaded instance of the enabled record `id`
    pub async fn get_plugin(&self, id: RecordId) -> PluginResult<Option<Arc<LivePlugin>>> {
        match self.store.get_plugin(id).await? {
            Some(record) => self.get_enabled(record).await,
            None => Ok(None),
        }
    }

    pub async fn get_plugin_by_name(
        &self,
        plugin_type: &str,
        name: &str,
    ) -> PluginResult<Option<Arc<LivePlugin>>> {
        match self.store.find_plugin(plugin_type, name).await? {
            Some(record) => self.get_enabled(record).await,
            None => Ok(None),
        }
    }

    async fn get_enabled(&self, record: PluginRecord) -> PluginResult<Option<Arc<LivePlugin>>> {
        if !record.enabled {
            log::warn!("Plugin {} is disabled", record);
            return Ok(None);
        }
        self.get_or_create_record(&record).await
    }

    /// Every enabled plugin of a type that loads, optionally one implementation
    pub async fn get_plugins(
        &self,
        plugin_type: &str,
        plugin_name: Option<&str>,
    ) -> PluginResult<Vec<Arc<LivePlugin>>> {
        let mut filter = PluginFilter::enabled_of_type(plugin_type);
        if let Some(plugin_name) = plugin_name {
            filter = filter.with_plugin_name(plugin_name);
        }

        let mut plugins = Vec::new();
        for record in self.store.list_plugins(&filter).await? {
            match self.get_or_create_record(&record).await {
                Ok(Some(instance)) => plugins.push(instance),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping {}: {}", record, e),
            }
        }
        Ok(plugins)
    }

    /// Records a reference field could point at
    pub async fn selectable_plugins(
        &self,
        reference: &PluginReference,
    ) -> PluginResult<Vec<PluginRecord>> {
        let filter = PluginFilter {
            plugin_type: reference.plugin_type.clone(),
            plugin_name: reference.plugin_name.clone(),
            enabled: Some(true),
        };

        let mut selectable = Vec::new();
        for record in self.store.list_plugins(&filter).await? {
            if self.check_reference(reference, &record).is_ok() && self.can_load(&record).await {
                selectable.push(record);
            }
        }
        Ok(selectable)
    }

    /// Parse raw kwargs for `command`, resolving references to loaded plugins
    pub async fn parse_command_kwargs(
        &self,
        command: &Command,
        raw: &Value,
    ) -> CommandResult<ConfigValue> {
        let resolver = ConstructionResolver {
            manager: self,
            chain: &[],
        };
        command.parse_kwargs(raw, &resolver).await
    }

    /// Whether `allowed` grants access to `key` or to any plugin that
    /// references it, directly or through other referrers
    pub fn has_cascading_access(&self, key: &PluginKey, allowed: impl Fn(&Permission) -> bool) -> bool {
        let Some(start) = self.cache.lookup(key) else {
            return false;
        };

        let mut visited: HashSet<PluginKey> = HashSet::new();
        let mut pending = vec![start];
        while let Some(instance) = pending.pop() {
            if !visited.insert(instance.key().clone()) {
                continue;
            }
            log::trace!("Checking permission {}", instance.permission().codename);
            if allowed(instance.permission()) {
                return true;
            }
            for related in instance.related_plugins().iter().rev() {
                if let Some(live) = related.resolve() {
                    if !visited.contains(live.key()) {
                        pending.push(live);
                    }
                }
            }
        }
        false
    }

    /// Validate a referenced record against a reference field's constraints
    fn check_reference(&self, reference: &PluginReference, record: &PluginRecord) -> Result<(), String> {
        let key = record.key();
        if !record.enabled {
            return Err(format!("Plugin {} is disabled.", key));
        }
        if let Some(plugin_type) = &reference.plugin_type {
            if *plugin_type != record.plugin_type {
                return Err(format!("Plugin {} is not of type {}.", key, plugin_type));
            }
        }
        if let Some(plugin_name) = &reference.plugin_name {
            if *plugin_name != record.plugin_name {
                return Err(format!("Plugin {} is not a {} plugin.", key, plugin_name));
            }
        }

        let descriptor = self
            .descriptor(&record.plugin_type, &record.plugin_name)
            .ok_or_else(|| format!("No implementation registered for plugin {}.", key))?;
        if !descriptor.has_traits(&reference.traits) {
            let missing: Vec<&str> = reference
                .traits
                .difference(descriptor.traits())
                .map(String::as_str)
                .collect();
            return Err(format!(
                "Plugin {} lacks required traits: {}.",
                key,
                missing.join(", ")
            ));
        }
        Ok(())
    }

    async fn find_referenced(&self, reference: &PluginReference, raw: &Value) -> Result<PluginRecord, String> {
        let found = match raw {
            Value::Number(n) => {
                let id = n
                    .as_i64()
                    .ok_or_else(|| "Not a valid plugin id.".to_string())?;
                self.store.get_plugin(id).await
            }
            Value::String(name) => {
                let Some(plugin_type) = &reference.plugin_type else {
                    return Err("A plugin type is required to reference plugins by name.".to_string());
                };
                self.store.find_plugin(plugin_type, name).await
            }
            _ => return Err("Not a valid plugin reference.".to_string()),
        };

        found
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Could not find plugin {}.", raw))
    }
}

/// Walk `config` and add `handle` as a referrer of every loaded target
///
/// Returns the targets that gained an edge.
fn link_references(config: &ConfigValue, handle: &PluginHandle) -> Vec<Arc<LivePlugin>> {
    let mut linked = Vec::new();
    config.walk(&mut |target: &PluginHandle| {
        if let Some(live) = target.resolve() {
            if live.add_related(handle.clone()) {
                linked.push(live);
            }
        }
    });
    linked
}

fn join_keys(keys: &[PluginKey]) -> String {
    keys.iter().map(PluginKey::to_string).collect::<Vec<_>>().join(" -> ")
}

/// Resolves references while constructing a plugin
struct ConstructionResolver<'a> {
    manager: &'a PluginManager,
    chain: &'a [PluginKey],
}

#[async_trait]
impl ReferenceResolver for ConstructionResolver<'_> {
    async fn resolve(&self, reference: &PluginReference, raw: &Value) -> Result<PluginHandle, String> {
        let record = self.manager.find_referenced(reference, raw).await?;
        self.manager.check_reference(reference, &record)?;

        let key = record.key();
        if let Some(live) = self.manager.cache.lookup(&key) {
            return Ok(live.handle().clone());
        }
        if !reference.load_on_demand {
            return Err(format!("Plugin {} is not loaded.", key));
        }
        if self.chain.contains(&key) {
            let path: Vec<PluginKey> = self
                .chain
                .iter()
                .chain(std::iter::once(&key))
                .cloned()
                .collect();
            return Err(format!("Circular plugin reference: {}.", join_keys(&path)));
        }

        match self
            .manager
            .get_or_create_in(record, self.chain.to_vec())
            .await
        {
            Ok(Some(live)) => Ok(live.handle().clone()),
            Ok(None) => Err(format!("No implementation registered for plugin {}.", key)),
            Err(e) => Err(format!("Failed to load plugin {}: {}", key, e)),
        }
    }
}

/// Resolves references to handles without loading anything
struct TeardownResolver<'a> {
    manager: &'a PluginManager,
}

#[async_trait]
impl ReferenceResolver for TeardownResolver<'_> {
    async fn resolve(&self, reference: &PluginReference, raw: &Value) -> Result<PluginHandle, String> {
        let record = self.manager.find_referenced(reference, raw).await?;
        Ok(self.manager.cache.handle(record.key()))
    }
}
