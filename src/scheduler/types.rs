//! Schedule records

use crate::plugin::types::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage identifier of a schedule
pub type ScheduleId = i64;

/// A stored recurring invocation of a plugin command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    /// `cron` or `interval`
    pub method: String,
    /// Whitespace separated trigger spec for `method`
    pub method_config: String,
    pub command: String,
    pub kwargs: serde_json::Value,
    pub plugin_id: RecordId,
    /// Lets a plugin re-declare "its" schedule idempotently
    pub plugin_unique_id: Option<String>,
    pub enabled: bool,
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schedule {} ({} '{}' -> {})",
            self.id, self.method, self.method_config, self.command
        )
    }
}

/// Fields for creating a schedule, also used as the `ensure_schedule` spec
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub method: String,
    pub method_config: String,
    pub command: String,
    pub kwargs: serde_json::Value,
    pub plugin_id: RecordId,
    pub plugin_unique_id: Option<String>,
    pub enabled: bool,
}

impl NewSchedule {
    pub fn new(
        plugin_id: RecordId,
        method: impl Into<String>,
        method_config: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            method_config: method_config.into(),
            command: command.into(),
            kwargs: serde_json::Value::Object(serde_json::Map::new()),
            plugin_id,
            plugin_unique_id: None,
            enabled: false,
        }
    }

    pub fn with_kwargs(mut self, kwargs: serde_json::Value) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_unique_id(mut self, plugin_unique_id: impl Into<String>) -> Self {
        self.plugin_unique_id = Some(plugin_unique_id.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Schedule {
    /// Copy the declared fields of `spec` onto this schedule and enable it
    ///
    /// Returns whether anything changed.
    pub fn apply_spec(&mut self, spec: &NewSchedule) -> bool {
        let mut changed = false;

        if self.method != spec.method {
            self.method = spec.method.clone();
            changed = true;
        }
        if self.method_config != spec.method_config {
            self.method_config = spec.method_config.clone();
            changed = true;
        }
        if self.command != spec.command {
            self.command = spec.command.clone();
            changed = true;
        }
        if self.kwargs != spec.kwargs {
            self.kwargs = spec.kwargs.clone();
            changed = true;
        }
        if !self.enabled {
            self.enabled = true;
            changed = true;
        }

        changed
    }
}
