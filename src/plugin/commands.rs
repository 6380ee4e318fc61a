//! Command Execution Layer
//!
//! Plugins expose named commands with a kwargs schema. Callers (the
//! scheduler, the command line, an admin surface) resolve a command on a
//! live instance, parse raw kwargs against its schema and execute it.

use crate::plugin::error::PluginResult;
use crate::plugin::schema::{ConfigValue, ReferenceResolver, Schema, ValidationError, SCHEMA_KEY};
use crate::plugin::traits::LivePlugin;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Plugin '{plugin}' has no command '{command}'")]
    NotFound { plugin: String, command: String },

    #[error("Invalid arguments for command '{command}': {source}")]
    InvalidArguments {
        command: String,
        #[source]
        source: ValidationError,
    },

    #[error("Command '{command}' failed: {cause}")]
    Failed { command: String, cause: String },
}

/// Result type for command operations
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Arguments passed to a command handler
#[derive(Debug, Clone)]
pub struct CommandCall {
    /// Instance the command runs on
    pub instance: Arc<LivePlugin>,
    /// Parsed kwargs
    pub kwargs: ConfigValue,
}

impl CommandCall {
    pub fn arg(&self, name: &str) -> Option<&ConfigValue> {
        self.kwargs.get(name)
    }
}

pub type CommandHandler =
    Arc<dyn Fn(CommandCall) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync>;

/// A named operation on a plugin
#[derive(Clone)]
pub struct Command {
    name: String,
    display_name: String,
    description: String,
    schema: Arc<Schema>,
    handler: CommandHandler,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl Command {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CommandCall) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            schema: Arc::new(Schema::new()),
            handler: Arc::new(handler),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validate raw kwargs; `null` is treated as no arguments
    pub async fn parse_kwargs(
        &self,
        raw: &Value,
        resolver: &dyn ReferenceResolver,
    ) -> CommandResult<ConfigValue> {
        if !raw.is_null() && !raw.is_object() {
            return Err(CommandError::InvalidArguments {
                command: self.name.clone(),
                source: ValidationError::single(SCHEMA_KEY, "Invalid input type."),
            });
        }
        self.schema
            .load(raw, resolver)
            .await
            .map_err(|source| CommandError::InvalidArguments {
                command: self.name.clone(),
                source,
            })
    }

    pub async fn execute(&self, call: CommandCall) -> PluginResult<Value> {
        log::debug!("Executing command '{}' on {}", self.name, call.instance.key());
        (self.handler)(call).await
    }
}

/// Commands declared by a plugin implementation, in declaration order
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    commands: Vec<Arc<Command>>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command, replacing any earlier one with the same name
    pub fn insert(&mut self, command: Command) {
        let command = Arc::new(command);
        match self.commands.iter_mut().find(|c| c.name == command.name) {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Command>> {
        self.commands.iter().find(|c| c.name == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
