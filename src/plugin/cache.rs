//! Plugin Cache
//!
//! Process-local map of loaded instances keyed by `(plugin_type, name)`,
//! kept in insertion order. The lock is a std `RwLock` and is never held
//! across an await point.

use crate::core::sync::{recover_read, recover_write};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::LivePlugin;
use crate::plugin::types::PluginKey;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, Weak};

#[derive(Default)]
pub(crate) struct CacheInner {
    order: Vec<PluginKey>,
    index: HashMap<PluginKey, Arc<LivePlugin>>,
}

/// Shared plugin cache; clones refer to the same map
#[derive(Clone, Default)]
pub struct PluginCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl fmt::Debug for PluginCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = recover_read(self.inner.read());
        f.debug_struct("PluginCache")
            .field("loaded", &inner.order)
            .finish()
    }
}

impl PluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &PluginKey) -> bool {
        recover_read(self.inner.read()).index.contains_key(key)
    }

    pub fn get(&self, key: &PluginKey) -> PluginResult<Arc<LivePlugin>> {
        self.lookup(key)
            .ok_or_else(|| PluginError::NotFound { key: key.clone() })
    }

    pub fn lookup(&self, key: &PluginKey) -> Option<Arc<LivePlugin>> {
        recover_read(self.inner.read()).index.get(key).cloned()
    }

    pub fn add(&self, instance: Arc<LivePlugin>) -> PluginResult<()> {
        let mut inner = recover_write(self.inner.write());
        let key = instance.key().clone();
        if inner.index.contains_key(&key) {
            return Err(PluginError::AlreadyLoaded { key });
        }
        inner.order.push(key.clone());
        inner.index.insert(key, instance);
        Ok(())
    }

    pub fn remove(&self, key: &PluginKey) -> Option<Arc<LivePlugin>> {
        let mut inner = recover_write(self.inner.write());
        let removed = inner.index.remove(key);
        if removed.is_some() {
            inner.order.retain(|k| k != key);
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = recover_write(self.inner.write());
        inner.order.clear();
        inner.index.clear();
    }

    /// Loaded instances in insertion order
    pub fn list_loaded(&self) -> Vec<Arc<LivePlugin>> {
        let inner = recover_read(self.inner.read());
        inner
            .order
            .iter()
            .filter_map(|key| inner.index.get(key).cloned())
            .collect()
    }

    pub fn keys(&self) -> Vec<PluginKey> {
        recover_read(self.inner.read()).order.clone()
    }

    pub fn len(&self) -> usize {
        recover_read(self.inner.read()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for `key`, whether or not it is loaded
    pub fn handle(&self, key: PluginKey) -> PluginHandle {
        PluginHandle {
            key,
            cache: Arc::downgrade(&self.inner),
        }
    }
}

/// Reference to a possibly loaded plugin
///
/// Handles are what configuration trees and related-plugin lists store.
/// They do not keep the instance alive; `resolve()` looks the key up in the
/// cache at call time.
#[derive(Clone)]
pub struct PluginHandle {
    key: PluginKey,
    cache: Weak<RwLock<CacheInner>>,
}

impl PluginHandle {
    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    /// The live instance, if it is currently loaded
    pub fn resolve(&self) -> Option<Arc<LivePlugin>> {
        let cache = self.cache.upgrade()?;
        let inner = recover_read(cache.read());
        inner.index.get(&self.key).cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.resolve().is_some()
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginHandle({})", self.key)
    }
}

impl fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl PartialEq for PluginHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PluginHandle {}

impl Hash for PluginHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
