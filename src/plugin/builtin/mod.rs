//! Built-in Plugin Implementations
//!
//! Plugins that ship with the binary. Nothing is registered implicitly;
//! call [`register_builtin_plugins`] on a manager to make them available.

pub mod heartbeat;
pub mod memory;

pub use heartbeat::{HeartbeatPlugin, HEARTBEAT_PLUGIN};
pub use memory::{MemoryStoragePlugin, MEMORY_PLUGIN};

use crate::plugin::error::PluginResult;
use crate::plugin::manager::PluginManager;
use crate::plugin::registry::PluginTypeDescriptor;

pub const STORAGE_TYPE: &str = "storage";
pub const SERVICE_TYPE: &str = "service";

/// Trait every storage implementation declares
pub const KV_TRAIT: &str = "kv";

/// Register the built-in plugin types and implementations
pub fn register_builtin_plugins(manager: &PluginManager) -> PluginResult<()> {
    manager.register_type(
        PluginTypeDescriptor::new(STORAGE_TYPE)
            .with_required_traits([KV_TRAIT])
            .with_description("Key/value storage back ends"),
    )?;
    manager.register_type(
        PluginTypeDescriptor::new(SERVICE_TYPE).with_description("Long running services"),
    )?;

    manager.register(memory::descriptor())?;
    manager.register(heartbeat::descriptor())?;
    Ok(())
}
