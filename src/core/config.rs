//! TOML configuration file parsing and loading
//!
//! A configuration file describes how the process bootstraps: the plugin
//! type initialization order, logging, the scheduler and an optional seed
//! set of plugin and schedule records for the in-memory store.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error reading configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("The specified configuration file does not exist: {path}")]
    Missing { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Log line layout
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Ext,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub color: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            color: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginSettings {
    /// Plugin types in the order they are bootstrapped
    pub initialization_order: Vec<String>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            initialization_order: vec!["storage".to_string(), "service".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub job_id_prefix: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            job_id_prefix: "scheduler_".to_string(),
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn enabled_by_default() -> bool {
    true
}

/// A plugin record to insert at startup
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedPlugin {
    pub id: Option<i64>,
    pub name: String,
    pub plugin_type: String,
    pub plugin_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

/// A schedule to insert at startup, attached to a seeded plugin by name
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedSchedule {
    pub plugin: String,
    pub plugin_type: String,
    pub method: String,
    pub method_config: String,
    pub command: String,
    #[serde(default = "empty_object")]
    pub kwargs: serde_json::Value,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub plugin_unique_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedSettings {
    pub plugins: Vec<SeedPlugin>,
    pub schedules: Vec<SeedSchedule>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub plugins: PluginSettings,
    pub logging: LoggingSettings,
    pub scheduler: SchedulerSettings,
    pub seed: SeedSettings,
}

impl Settings {
    /// Default configuration file location, `<config dir>/plugrack/plugrack.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("plugrack").join("plugrack.toml"))
    }

    /// Load settings from an explicit path, the default path, or defaults
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub async fn load(config_file: Option<&Path>) -> ConfigResult<Self> {
        let path = match config_file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Missing {
                        path: path.to_path_buf(),
                    });
                }
                Some(path.to_path_buf())
            }
            None => Self::default_path().filter(|p| p.exists()),
        };

        let Some(path) = path else {
            log::debug!("No configuration file found, using defaults");
            return Ok(Self::default());
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        let settings: Settings = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        settings.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let settings: Settings = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen_types = HashSet::new();
        for plugin_type in &self.plugins.initialization_order {
            if !seen_types.insert(plugin_type.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "plugin type '{}' appears more than once in initialization_order",
                        plugin_type
                    ),
                });
            }
        }

        let mut seen_plugins = HashSet::new();
        for plugin in &self.seed.plugins {
            if plugin.name.is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("seeded {} plugin is missing a name", plugin.plugin_type),
                });
            }
            if !seen_plugins.insert((plugin.plugin_type.as_str(), plugin.name.as_str())) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "seeded plugin '{}' of type '{}' is declared twice",
                        plugin.name, plugin.plugin_type
                    ),
                });
            }
        }

        for schedule in &self.seed.schedules {
            if !seen_plugins.contains(&(schedule.plugin_type.as_str(), schedule.plugin.as_str())) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "schedule for command '{}' references unknown plugin '{}' of type '{}'",
                        schedule.command, schedule.plugin, schedule.plugin_type
                    ),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file_contents() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(
            settings.plugins.initialization_order,
            vec!["storage".to_string(), "service".to_string()]
        );
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.scheduler.job_id_prefix, "scheduler_");
        assert!(settings.seed.plugins.is_empty());
    }

    #[test]
    fn test_full_document_parses() {
        let settings = Settings::from_toml_str(
            r#"
            [plugins]
            initialization_order = ["storage", "service"]

            [logging]
            level = "debug"
            format = "json"
            color = false

            [[seed.plugins]]
            name = "kv"
            plugin_type = "storage"
            plugin_name = "memory"
            config = { namespace = "main" }

            [[seed.plugins]]
            name = "pulse"
            plugin_type = "service"
            plugin_name = "heartbeat"
            config = { storage = "kv", message = "tick" }

            [[seed.schedules]]
            plugin = "pulse"
            plugin_type = "service"
            method = "interval"
            method_config = "seconds=30"
            command = "beat"
            "#,
        )
        .unwrap();

        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(!settings.logging.color);
        assert_eq!(settings.seed.plugins.len(), 2);
        assert!(settings.seed.plugins[0].enabled);
        assert_eq!(settings.seed.plugins[1].config["storage"], "kv");
        assert_eq!(settings.seed.schedules[0].kwargs, serde_json::json!({}));
    }

    #[test]
    fn test_duplicate_initialization_type_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [plugins]
            initialization_order = ["service", "service"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("service"));
    }

    #[test]
    fn test_schedule_for_unknown_plugin_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [[seed.schedules]]
            plugin = "ghost"
            plugin_type = "service"
            method = "cron"
            method_config = "0"
            command = "beat"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_log_format_is_parse_error() {
        let err = Settings::from_toml_str("[logging]\nformat = \"xml\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("ext".parse::<LogFormat>().unwrap(), LogFormat::Ext);
        assert_eq!(LogFormat::Json.to_string(), "json");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\njob_id_prefix = \"job_\"").unwrap();

        let settings = Settings::load(Some(file.path())).await.unwrap();
        assert_eq!(settings.scheduler.job_id_prefix, "job_");
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        let err = Settings::load(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }
}
