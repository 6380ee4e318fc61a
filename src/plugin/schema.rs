//! Configuration schemas
//!
//! Stored plugin configuration and command arguments are opaque JSON. A
//! `Schema` validates that JSON field by field and produces a typed
//! `ConfigValue` tree in which plugin references are already resolved to
//! `PluginHandle`s. Keys the schema does not declare are kept by default,
//! so configuration written by older or newer plugin versions still loads.

use crate::plugin::cache::PluginHandle;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Error key used for problems with the document as a whole
pub const SCHEMA_KEY: &str = "_schema";

/// Deserialized configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
    Plugin(PluginHandle),
}

/// Visits the plugin references in a config tree
pub trait ConfigVisitor {
    fn visit_plugin(&mut self, handle: &PluginHandle);
}

impl<F: FnMut(&PluginHandle)> ConfigVisitor for F {
    fn visit_plugin(&mut self, handle: &PluginHandle) {
        self(handle)
    }
}

impl ConfigValue {
    pub fn empty_map() -> Self {
        ConfigValue::Map(BTreeMap::new())
    }

    /// Untyped conversion, used for keys no schema field describes
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ConfigValue::String(s.clone()),
            Value::Array(items) => ConfigValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => ConfigValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON rendering; plugin references become their `type:name` key
    pub fn to_json(&self) -> Value {
        match self {
            ConfigValue::Null => Value::Null,
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Integer(i) => Value::from(*i),
            ConfigValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ConfigValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ConfigValue::Plugin(handle) => Value::String(handle.key().to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_plugin(&self) -> Option<&PluginHandle> {
        match self {
            ConfigValue::Plugin(handle) => Some(handle),
            _ => None,
        }
    }

    /// Member of a map value
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Depth-first walk: list items in order, map values in key order,
    /// scalars ignored
    pub fn walk<V: ConfigVisitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            ConfigValue::List(items) => {
                for item in items {
                    item.walk(visitor);
                }
            }
            ConfigValue::Map(map) => {
                for value in map.values() {
                    value.walk(visitor);
                }
            }
            ConfigValue::Plugin(handle) => visitor.visit_plugin(handle),
            ConfigValue::Null
            | ConfigValue::Bool(_)
            | ConfigValue::Integer(_)
            | ConfigValue::Float(_)
            | ConfigValue::String(_) => {}
        }
    }

    /// Every plugin reference in walk order, duplicates included
    pub fn plugin_references(&self) -> Vec<PluginHandle> {
        let mut found = Vec::new();
        self.walk(&mut |handle: &PluginHandle| found.push(handle.clone()));
        found
    }
}

/// Field-level validation failures, keyed by dotted field path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    messages: BTreeMap<String, Vec<String>>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.add(field, message);
        err
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.messages
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (field, messages) in other.messages {
            self.messages.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &BTreeMap<String, Vec<String>> {
        &self.messages
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.messages.get(field).map(|m| m.as_slice())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .messages
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// What to do with keys the schema does not declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownPolicy {
    /// Keep them as untyped values
    #[default]
    Include,
    /// Drop them
    Exclude,
    /// Report them as errors
    Raise,
}

/// Constraints on a plugin reference field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginReference {
    pub plugin_type: Option<String>,
    pub plugin_name: Option<String>,
    pub traits: BTreeSet<String>,
    /// Construct the referenced plugin if it is not loaded yet
    pub load_on_demand: bool,
}

impl PluginReference {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: Some(plugin_type.into()),
            ..Self::default()
        }
    }

    pub fn with_plugin_name(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin_name.into());
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

    pub fn load_on_demand(mut self) -> Self {
        self.load_on_demand = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Any JSON, kept untyped
    Any,
    List(Box<FieldKind>),
    /// String-keyed mapping with uniformly typed values
    Dict(Box<FieldKind>),
    Nested(Arc<Schema>),
    /// A record id (integer) or, with a plugin type set, an instance name
    Plugin(PluginReference),
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    required: bool,
    allow_null: bool,
    default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            allow_null: false,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Any)
    }

    pub fn list(name: impl Into<String>, item: FieldKind) -> Self {
        Self::new(name, FieldKind::List(Box::new(item)))
    }

    pub fn nested(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldKind::Nested(Arc::new(schema)))
    }

    pub fn plugin(name: impl Into<String>, reference: PluginReference) -> Self {
        Self::new(name, FieldKind::Plugin(reference))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Value loaded in place of a missing key
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }
}

/// Resolves raw plugin references found while loading a schema
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn resolve(&self, reference: &PluginReference, raw: &Value) -> Result<PluginHandle, String>;
}

/// Resolver for contexts where plugin references are not allowed
pub struct NoReferences;

#[async_trait]
impl ReferenceResolver for NoReferences {
    async fn resolve(&self, _reference: &PluginReference, _raw: &Value) -> Result<PluginHandle, String> {
        Err("Plugin references are not available here.".to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    unknown: UnknownPolicy,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unknown(mut self, policy: UnknownPolicy) -> Self {
        self.unknown = policy;
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Validate `raw` and build the typed tree
    ///
    /// `null` loads like an empty object. Anything other than an object is
    /// rejected under [`SCHEMA_KEY`].
    pub fn load<'a>(
        &'a self,
        raw: &'a Value,
        resolver: &'a dyn ReferenceResolver,
    ) -> BoxFuture<'a, Result<ConfigValue, ValidationError>> {
        async move {
            let empty = serde_json::Map::new();
            let object = match raw {
                Value::Object(map) => map,
                Value::Null => &empty,
                _ => return Err(ValidationError::single(SCHEMA_KEY, "Invalid input type.")),
            };
            let map = load_object(self, object, String::new(), resolver).await?;
            Ok(ConfigValue::Map(map))
        }
        .boxed()
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn load_object<'a>(
    schema: &'a Schema,
    object: &'a serde_json::Map<String, Value>,
    prefix: String,
    resolver: &'a dyn ReferenceResolver,
) -> BoxFuture<'a, Result<BTreeMap<String, ConfigValue>, ValidationError>> {
    async move {
        let mut loaded = BTreeMap::new();
        let mut errors = ValidationError::new();

        for field in &schema.fields {
            let path = join_path(&prefix, &field.name);
            let value = match object.get(&field.name) {
                Some(value) => value,
                None => match &field.default {
                    Some(default) => default,
                    None => {
                        if field.required {
                            errors.add(path, "Missing data for required field.");
                        }
                        continue;
                    }
                },
            };

            if value.is_null() {
                if field.allow_null {
                    loaded.insert(field.name.clone(), ConfigValue::Null);
                } else {
                    errors.add(path, "Field may not be null.");
                }
                continue;
            }

            match load_kind(&field.kind, value, path, resolver).await {
                Ok(typed) => {
                    loaded.insert(field.name.clone(), typed);
                }
                Err(e) => errors.merge(e),
            }
        }

        for (key, value) in object {
            if schema.fields.iter().any(|f| f.name == *key) {
                continue;
            }
            match schema.unknown {
                UnknownPolicy::Include => {
                    loaded.insert(key.clone(), ConfigValue::from_json(value));
                }
                UnknownPolicy::Exclude => {}
                UnknownPolicy::Raise => errors.add(join_path(&prefix, key), "Unknown field."),
            }
        }

        if errors.is_empty() {
            Ok(loaded)
        } else {
            Err(errors)
        }
    }
    .boxed()
}

const TRUTHY: &[&str] = &["t", "true", "on", "y", "yes", "1"];
const FALSY: &[&str] = &["f", "false", "off", "n", "no", "0"];

fn load_kind<'a>(
    kind: &'a FieldKind,
    value: &'a Value,
    path: String,
    resolver: &'a dyn ReferenceResolver,
) -> BoxFuture<'a, Result<ConfigValue, ValidationError>> {
    async move {
        if value.is_null() && !matches!(kind, FieldKind::Any) {
            return Err(ValidationError::single(path, "Field may not be null."));
        }

        match kind {
            FieldKind::Any => Ok(ConfigValue::from_json(value)),
            FieldKind::String => value
                .as_str()
                .map(|s| ConfigValue::String(s.to_string()))
                .ok_or_else(|| ValidationError::single(path, "Not a valid string.")),
            FieldKind::Integer => {
                let parsed = match value {
                    Value::Number(n) => n.as_i64().or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                            .map(|f| f as i64)
                    }),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                parsed
                    .map(ConfigValue::Integer)
                    .ok_or_else(|| ValidationError::single(path, "Not a valid integer."))
            }
            FieldKind::Float => {
                let parsed = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                parsed
                    .filter(|f| f.is_finite())
                    .map(ConfigValue::Float)
                    .ok_or_else(|| ValidationError::single(path, "Not a valid number."))
            }
            FieldKind::Boolean => {
                let parsed = match value {
                    Value::Bool(b) => Some(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(1) => Some(true),
                        Some(0) => Some(false),
                        _ => None,
                    },
                    Value::String(s) => {
                        let lowered = s.to_lowercase();
                        if TRUTHY.contains(&lowered.as_str()) {
                            Some(true)
                        } else if FALSY.contains(&lowered.as_str()) {
                            Some(false)
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                parsed
                    .map(ConfigValue::Bool)
                    .ok_or_else(|| ValidationError::single(path, "Not a valid boolean."))
            }
            FieldKind::List(item_kind) => {
                let Value::Array(items) = value else {
                    return Err(ValidationError::single(path, "Not a valid list."));
                };
                let mut loaded = Vec::with_capacity(items.len());
                let mut errors = ValidationError::new();
                for (index, item) in items.iter().enumerate() {
                    let item_path = join_path(&path, &index.to_string());
                    match load_kind(item_kind, item, item_path, resolver).await {
                        Ok(typed) => loaded.push(typed),
                        Err(e) => errors.merge(e),
                    }
                }
                if errors.is_empty() {
                    Ok(ConfigValue::List(loaded))
                } else {
                    Err(errors)
                }
            }
            FieldKind::Dict(value_kind) => {
                let Value::Object(map) = value else {
                    return Err(ValidationError::single(path, "Not a valid mapping type."));
                };
                let mut loaded = BTreeMap::new();
                let mut errors = ValidationError::new();
                for (key, item) in map {
                    let item_path = join_path(&path, key);
                    match load_kind(value_kind, item, item_path, resolver).await {
                        Ok(typed) => {
                            loaded.insert(key.clone(), typed);
                        }
                        Err(e) => errors.merge(e),
                    }
                }
                if errors.is_empty() {
                    Ok(ConfigValue::Map(loaded))
                } else {
                    Err(errors)
                }
            }
            FieldKind::Nested(schema) => {
                let Value::Object(map) = value else {
                    return Err(ValidationError::single(path, "Invalid input type."));
                };
                load_object(schema, map, path, resolver)
                    .await
                    .map(ConfigValue::Map)
            }
            FieldKind::Plugin(reference) => resolver
                .resolve(reference, value)
                .await
                .map(ConfigValue::Plugin)
                .map_err(|message| ValidationError::single(path, message)),
        }
    }
    .boxed()
}
