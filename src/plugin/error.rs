//! Plugin Error Handling
//!
//! Error types for registration, construction, lookup and command execution.

use crate::plugin::commands::CommandError;
use crate::plugin::schema::ValidationError;
use crate::plugin::types::PluginKey;
use crate::store::StoreError;

/// Result type alias for plugin operations
pub type PluginResult<T> = std::result::Result<T, PluginError>;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A descriptor names a plugin type nobody registered
    #[error("{plugin_type} is not a known plugin type (plugin '{plugin_name}')")]
    UnknownPluginType {
        plugin_type: String,
        plugin_name: String,
    },

    /// A descriptor does not declare the traits its plugin type requires
    #[error("'{plugin_name}' does not satisfy plugin type '{plugin_type}', missing traits: {missing:?}")]
    NotASubclass {
        plugin_type: String,
        plugin_name: String,
        missing: Vec<String>,
    },

    #[error("Plugin of type '{plugin_type}' is missing a name")]
    MissingName { plugin_type: String },

    #[error("Plugin not loaded: {key}")]
    NotFound { key: PluginKey },

    #[error("Plugin already loaded: {key}")]
    AlreadyLoaded { key: PluginKey },

    #[error("Invalid configuration for plugin {key}: {source}")]
    InvalidConfig {
        key: PluginKey,
        #[source]
        source: ValidationError,
    },

    /// The plugin's constructor or ready hook refused to start
    #[error("Failed to construct plugin {key}: {cause}")]
    ConstructionFailed { key: PluginKey, cause: String },

    #[error("Plugin '{plugin}' failed during '{operation}': {cause}")]
    Execution {
        plugin: String,
        operation: String,
        cause: String,
    },

    #[error("Failed to obtain permission '{codename}': {cause}")]
    Permission { codename: String, cause: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{message}")]
    Sync { message: String },
}

impl PluginError {
    pub fn construction(key: &PluginKey, cause: impl Into<String>) -> Self {
        PluginError::ConstructionFailed {
            key: key.clone(),
            cause: cause.into(),
        }
    }

    pub fn execution(
        plugin: impl Into<String>,
        operation: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        PluginError::Execution {
            plugin: plugin.into(),
            operation: operation.into(),
            cause: cause.into(),
        }
    }
}
