//! Public API for the plugin system
//!
//! External modules should import from here rather than directly from
//! internal modules.

// Lifecycle management
pub use crate::plugin::manager::{PluginManager, DEFAULT_INITIALIZATION_ORDER};

// Error handling
pub use crate::plugin::error::{PluginError, PluginResult};

// Identity and stored records
pub use crate::plugin::types::{NewPlugin, PluginFilter, PluginKey, PluginRecord, RecordId};

// Registry
pub use crate::plugin::registry::{PluginDescriptor, PluginTypeDescriptor, PluginTypeRegistry};

// Live instances and the plugin trait
pub use crate::plugin::cache::{PluginCache, PluginHandle};
pub use crate::plugin::lock::{ConstructionLocks, Flight, FlightGuard};
pub use crate::plugin::traits::{LivePlugin, Plugin, PluginConstructor, PluginInit};

// Configuration schemas
pub use crate::plugin::schema::{
    ConfigValue, ConfigVisitor, Field, FieldKind, NoReferences, PluginReference,
    ReferenceResolver, Schema, UnknownPolicy, ValidationError, SCHEMA_KEY,
};

// Commands
pub use crate::plugin::commands::{
    Command, CommandCall, CommandError, CommandHandler, CommandResult, CommandSet,
};

// Collaborators
pub use crate::plugin::events::{EventLog, LifecycleEvent, LifecycleListener};
pub use crate::plugin::permission::{MemoryPermissions, Permission, PermissionProvider};

// Built-in plugins
pub use crate::plugin::builtin::{
    register_builtin_plugins, HeartbeatPlugin, MemoryStoragePlugin, HEARTBEAT_PLUGIN,
    MEMORY_PLUGIN, SERVICE_TYPE, STORAGE_TYPE,
};
