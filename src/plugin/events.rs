//! Plugin lifecycle events
//!
//! Listeners registered on the `PluginManager` are told when an instance
//! has been published to the cache and right before it leaves it. They are
//! awaited inline, in registration order.

use crate::plugin::types::PluginRecord;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn plugin_loaded(&self, record: &PluginRecord);

    async fn plugin_unloaded(&self, record: &PluginRecord);
}

/// Compare listeners by allocation
pub(crate) fn same_listener(a: &Arc<dyn LifecycleListener>, b: &Arc<dyn LifecycleListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Loaded(String),
    Unloaded(String),
}

/// Listener that records every event it sees, as `type:name` strings
#[derive(Debug, Default)]
pub struct EventLog {
    events: std::sync::Mutex<Vec<LifecycleEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        crate::core::sync::recover_mutex(self.events.lock()).clone()
    }

    pub fn clear(&self) {
        crate::core::sync::recover_mutex(self.events.lock()).clear();
    }
}

#[async_trait]
impl LifecycleListener for EventLog {
    async fn plugin_loaded(&self, record: &PluginRecord) {
        log::trace!("Observed load of {}", record.key());
        crate::core::sync::recover_mutex(self.events.lock())
            .push(LifecycleEvent::Loaded(record.key().to_string()));
    }

    async fn plugin_unloaded(&self, record: &PluginRecord) {
        log::trace!("Observed unload of {}", record.key());
        crate::core::sync::recover_mutex(self.events.lock())
            .push(LifecycleEvent::Unloaded(record.key().to_string()));
    }
}
