//! Plugin Registry
//!
//! Registration of plugin types and of the implementations available for
//! each type. Registration is explicit: nothing is registered as a side
//! effect of defining an implementation.

use crate::plugin::commands::{Command, CommandSet};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::schema::Schema;
use crate::plugin::traits::{Plugin, PluginConstructor, PluginInit};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// A plugin type and the traits every implementation of it must declare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginTypeDescriptor {
    pub plugin_type: String,
    pub required_traits: BTreeSet<String>,
    pub description: String,
}

impl PluginTypeDescriptor {
    pub fn new(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            required_traits: BTreeSet::new(),
            description: String::new(),
        }
    }

    pub fn with_required_traits<I, S>(mut self, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_traits
            .extend(traits.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A registered plugin implementation
#[derive(Clone)]
pub struct PluginDescriptor {
    plugin_type: String,
    plugin_name: String,
    schema: Arc<Schema>,
    traits: BTreeSet<String>,
    priority: i32,
    commands: CommandSet,
    constructor: PluginConstructor,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("plugin_type", &self.plugin_type)
            .field("plugin_name", &self.plugin_name)
            .field("traits", &self.traits)
            .field("priority", &self.priority)
            .field("commands", &self.commands.names())
            .finish()
    }
}

impl PluginDescriptor {
    pub fn new<F>(plugin_type: impl Into<String>, plugin_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&PluginInit<'_>) -> PluginResult<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            plugin_type: plugin_type.into(),
            plugin_name: plugin_name.into(),
            schema: Arc::new(Schema::new()),
            traits: BTreeSet::new(),
            priority: 0,
            commands: CommandSet::new(),
            constructor: Arc::new(constructor),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    pub fn with_traits<I, S>(mut self, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.traits.extend(traits.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.insert(command);
        self
    }

    pub fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn traits(&self) -> &BTreeSet<String> {
        &self.traits
    }

    pub fn has_traits(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.traits)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub(crate) fn construct(&self, init: &PluginInit<'_>) -> PluginResult<Box<dyn Plugin>> {
        (self.constructor)(init)
    }
}

/// Registry of plugin types and implementations
#[derive(Debug, Default)]
pub struct PluginTypeRegistry {
    /// Types in registration order
    types: Vec<PluginTypeDescriptor>,

    /// Implementations per type, in registration order
    plugins: HashMap<String, Vec<Arc<PluginDescriptor>>>,
}

impl PluginTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin type; registering a type twice keeps the first
    pub fn register_type(&mut self, descriptor: PluginTypeDescriptor) {
        if self.plugin_type(&descriptor.plugin_type).is_some() {
            log::warn!(
                "Plugin type '{}' is already registered, ignoring",
                descriptor.plugin_type
            );
            return;
        }
        log::info!("Registered plugin type '{}'", descriptor.plugin_type);
        self.plugins
            .insert(descriptor.plugin_type.clone(), Vec::new());
        self.types.push(descriptor);
    }

    /// Register an implementation of a known plugin type
    ///
    /// Registering the same `(plugin_type, plugin_name)` again replaces the
    /// earlier descriptor, keeping its position.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> PluginResult<()> {
        if descriptor.plugin_name.is_empty() {
            return Err(PluginError::MissingName {
                plugin_type: descriptor.plugin_type.clone(),
            });
        }

        let type_descriptor = self
            .plugin_type(&descriptor.plugin_type)
            .ok_or_else(|| PluginError::UnknownPluginType {
                plugin_type: descriptor.plugin_type.clone(),
                plugin_name: descriptor.plugin_name.clone(),
            })?;

        let missing: Vec<String> = type_descriptor
            .required_traits
            .difference(&descriptor.traits)
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PluginError::NotASubclass {
                plugin_type: descriptor.plugin_type.clone(),
                plugin_name: descriptor.plugin_name.clone(),
                missing,
            });
        }

        let entries = self
            .plugins
            .entry(descriptor.plugin_type.clone())
            .or_default();
        let descriptor = Arc::new(descriptor);
        match entries
            .iter_mut()
            .find(|d| d.plugin_name == descriptor.plugin_name)
        {
            Some(existing) => {
                log::warn!(
                    "Plugin '{}' of type '{}' registered twice, replacing the earlier one",
                    descriptor.plugin_name,
                    descriptor.plugin_type
                );
                *existing = descriptor;
            }
            None => {
                log::info!(
                    "Registered plugin '{}' of type '{}'",
                    descriptor.plugin_name,
                    descriptor.plugin_type
                );
                entries.push(descriptor);
            }
        }
        Ok(())
    }

    pub fn get(&self, plugin_type: &str, plugin_name: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins
            .get(plugin_type)?
            .iter()
            .find(|d| d.plugin_name == plugin_name)
            .cloned()
    }

    /// Implementations of `plugin_type`, ascending by priority
    ///
    /// Equal priorities keep registration order. Unknown types yield an
    /// empty list.
    pub fn list_all(&self, plugin_type: &str) -> Vec<Arc<PluginDescriptor>> {
        let mut list = self.plugins.get(plugin_type).cloned().unwrap_or_default();
        list.sort_by_key(|d| d.priority);
        list
    }

    /// Every implementation, type by type in type registration order
    pub fn list_every(&self) -> Vec<Arc<PluginDescriptor>> {
        self.types
            .iter()
            .flat_map(|t| self.list_all(&t.plugin_type))
            .collect()
    }

    pub fn plugin_names(&self, plugin_type: &str) -> Vec<String> {
        self.list_all(plugin_type)
            .iter()
            .map(|d| d.plugin_name.clone())
            .collect()
    }

    pub fn plugin_type(&self, plugin_type: &str) -> Option<&PluginTypeDescriptor> {
        self.types.iter().find(|t| t.plugin_type == plugin_type)
    }

    pub fn plugin_types(&self) -> Vec<&PluginTypeDescriptor> {
        self.types.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::tests::utils::mock_descriptor;

    fn registry() -> PluginTypeRegistry {
        let mut registry = PluginTypeRegistry::new();
        registry.register_type(PluginTypeDescriptor::new("storage").with_required_traits(["kv"]));
        registry.register_type(PluginTypeDescriptor::new("service"));
        registry
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = registry();
        registry
            .register(mock_descriptor("storage", "memory").with_traits(["kv"]))
            .unwrap();

        let found = registry.get("storage", "memory").unwrap();
        assert_eq!(found.plugin_name(), "memory");
        assert!(registry.get("storage", "disk").is_none());
        assert!(registry.get("widget", "memory").is_none());
    }

    #[test]
    fn test_register_validates_descriptor() {
        let mut registry = registry();

        let err = registry.register(mock_descriptor("storage", "")).unwrap_err();
        assert!(matches!(err, PluginError::MissingName { .. }));

        let err = registry.register(mock_descriptor("widget", "clock")).unwrap_err();
        assert!(matches!(err, PluginError::UnknownPluginType { .. }));

        let err = registry.register(mock_descriptor("storage", "null")).unwrap_err();
        match err {
            PluginError::NotASubclass { missing, .. } => assert_eq!(missing, vec!["kv"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.list_all("storage").is_empty());
    }

    #[test]
    fn test_duplicate_type_registration_is_ignored() {
        let mut registry = registry();
        registry.register_type(PluginTypeDescriptor::new("storage"));

        assert_eq!(registry.plugin_types().len(), 2);
        assert!(registry.plugin_type("storage").unwrap().required_traits.contains("kv"));
    }

    #[test]
    fn test_list_all_is_stable_by_priority() {
        let mut registry = registry();
        registry.register(mock_descriptor("service", "a").with_priority(5)).unwrap();
        registry.register(mock_descriptor("service", "b")).unwrap();
        registry.register(mock_descriptor("service", "c").with_priority(-1)).unwrap();
        registry.register(mock_descriptor("service", "d")).unwrap();

        assert_eq!(registry.plugin_names("service"), vec!["c", "b", "d", "a"]);
        assert!(registry.list_all("widget").is_empty());
    }

    #[test]
    fn test_duplicate_registration_replaces_in_place() {
        let mut registry = registry();
        registry.register(mock_descriptor("service", "a")).unwrap();
        registry.register(mock_descriptor("service", "b")).unwrap();
        registry
            .register(mock_descriptor("service", "a").with_traits(["v2"]))
            .unwrap();

        assert_eq!(registry.plugin_names("service"), vec!["a", "b"]);
        assert!(registry.get("service", "a").unwrap().traits().contains("v2"));
    }

    #[test]
    fn test_list_every_follows_type_order() {
        let mut registry = registry();
        registry.register(mock_descriptor("service", "api")).unwrap();
        registry
            .register(mock_descriptor("storage", "memory").with_traits(["kv"]))
            .unwrap();

        let names: Vec<(String, String)> = registry
            .list_every()
            .iter()
            .map(|d| (d.plugin_type().to_string(), d.plugin_name().to_string()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("storage".to_string(), "memory".to_string()),
                ("service".to_string(), "api".to_string())
            ]
        );
    }
}
