//! Type definitions for the plugin system
//!
//! Identity keys, stored plugin records and the filters used to query them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage identifier of a plugin record
pub type RecordId = i64;

/// Identity of a configured plugin instance: `(plugin_type, name)`
///
/// Note this is not `(plugin_type, plugin_name)`; `plugin_name` selects the
/// implementation, `name` selects the configured instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginKey {
    pub plugin_type: String,
    pub name: String,
}

impl PluginKey {
    pub fn new(plugin_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            name: name.into(),
        }
    }

    /// Permission codename for this instance, `{plugin_type}.{name}`
    pub fn permission_codename(&self) -> String {
        format!("{}.{}", self.plugin_type, self.name)
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin_type, self.name)
    }
}

/// A stored plugin configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: RecordId,
    pub name: String,
    pub plugin_name: String,
    pub plugin_type: String,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub last_update: DateTime<Utc>,
}

impl PluginRecord {
    pub fn key(&self) -> PluginKey {
        PluginKey::new(&self.plugin_type, &self.name)
    }

    /// `display_name` from the config when present, else the instance name
    pub fn display_name(&self) -> &str {
        self.config
            .get("display_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.name)
    }
}

impl fmt::Display for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} using {}", self.name, self.plugin_type)
    }
}

/// Fields for creating a plugin record
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlugin {
    /// Requested id, or `None` to let the store assign one
    pub id: Option<RecordId>,
    pub name: String,
    pub plugin_name: String,
    pub plugin_type: String,
    pub enabled: bool,
    pub config: serde_json::Value,
}

impl NewPlugin {
    pub fn new(
        plugin_type: impl Into<String>,
        plugin_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            plugin_name: plugin_name.into(),
            plugin_type: plugin_type.into(),
            enabled: true,
            config: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Query filter for plugin records; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginFilter {
    pub plugin_type: Option<String>,
    pub plugin_name: Option<String>,
    pub enabled: Option<bool>,
}

impl PluginFilter {
    /// Enabled records of one plugin type
    pub fn enabled_of_type(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: Some(plugin_type.into()),
            plugin_name: None,
            enabled: Some(true),
        }
    }

    pub fn with_plugin_name(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self
    }

    pub fn matches(&self, record: &PluginRecord) -> bool {
        self.plugin_type
            .as_ref()
            .is_none_or(|t| *t == record.plugin_type)
            && self
                .plugin_name
                .as_ref()
                .is_none_or(|n| *n == record.plugin_name)
            && self.enabled.is_none_or(|e| e == record.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(config: serde_json::Value) -> PluginRecord {
        PluginRecord {
            id: 1,
            name: "main".to_string(),
            plugin_name: "memory".to_string(),
            plugin_type: "storage".to_string(),
            enabled: true,
            config,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_key_uses_instance_name() {
        let key = record(json!({})).key();
        assert_eq!(key, PluginKey::new("storage", "main"));
        assert_eq!(key.to_string(), "storage:main");
        assert_eq!(key.permission_codename(), "storage.main");
    }

    #[test]
    fn test_display_name_prefers_config() {
        assert_eq!(record(json!({"display_name": "Main KV"})).display_name(), "Main KV");
        assert_eq!(record(json!({"display_name": ""})).display_name(), "main");
        assert_eq!(record(json!(null)).display_name(), "main");
    }

    #[test]
    fn test_filter_matching() {
        let rec = record(json!({}));
        assert!(PluginFilter::default().matches(&rec));
        assert!(PluginFilter::enabled_of_type("storage").matches(&rec));
        assert!(!PluginFilter::enabled_of_type("service").matches(&rec));
        assert!(!PluginFilter::enabled_of_type("storage")
            .with_plugin_name("disk")
            .matches(&rec));

        let mut disabled = rec.clone();
        disabled.enabled = false;
        assert!(!PluginFilter::enabled_of_type("storage").matches(&disabled));
    }

    #[test]
    fn test_record_decodes_rfc3339_timestamp() {
        let rec: PluginRecord = serde_json::from_value(json!({
            "id": 7,
            "name": "main",
            "plugin_name": "memory",
            "plugin_type": "storage",
            "enabled": true,
            "config": {},
            "last_update": "2024-05-01T12:30:00Z",
        }))
        .unwrap();
        assert_eq!(rec.last_update.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert_eq!(rec.key(), PluginKey::new("storage", "main"));
    }
}
