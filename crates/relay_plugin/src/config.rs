//! Resolved plugin configuration and the typed reader handed to a plugin's
//! configuration step.
//!
//! A configuration is a type name plus a flat map of options. Option keys are
//! case insensitive. Modulator lists are plain options whose entries are either
//! a bare type name or a single-key map from type name to its own overrides:
//!
//! ```yaml
//! Type: format.Aggregate
//! Target: foo
//! Modulators:
//!   - format.Base64Encode
//!   - format.Envelope:
//!       Prefix: "<"
//! ```
use std::collections::HashSet;
use serde_json::{Map, Value};
use thiserror::Error;

/// Option key holding the plugin type in a declarative configuration.
pub const TYPE_KEY: &str = "type";

/// Errors raised while building plugins from configuration. All of them are
/// fatal to startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown plugin type '{0}'")]
    UnknownPluginType(String),

    #[error("plugin '{0}' has no type")]
    MissingType(String),

    #[error("malformed nested plugin spec in '{key}': {reason}")]
    MalformedNestedSpec { key: String, reason: String },

    #[error("plugin type '{type_name}' cannot be used as a {expected}")]
    CapabilityMismatch { type_name: String, expected: &'static str },

    #[error("option '{key}' of '{plugin}' must be {expected}, found {found}")]
    InvalidOption {
        plugin: String,
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("nested plugin configuration exceeds the maximum depth of {0}")]
    NestingTooDeep(usize),

    #[error("plugin '{plugin}' rejected its configuration: {message}")]
    Plugin { plugin: String, message: String },
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "a bool".into(),
        Value::Number(n) => format!("the number {}", n),
        Value::String(s) => format!("the string \"{}\"", s),
        Value::Array(_) => "a list".into(),
        Value::Object(_) => "a map".into(),
    }
}

// -----------------------------------------------------------------------------
// PluginConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PluginConfig {
    id: String,
    type_name: String,
    settings: Map<String, Value>,
}

impl PluginConfig {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            settings: Map::new(),
        }
    }

    /// Build a configuration from a declarative tree: a map with a `Type` entry
    /// and any number of flat options.
    pub fn from_value(id: impl Into<String>, value: Value) -> Result<Self, ConfigError> {
        let id = id.into();
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ConfigError::InvalidOption {
                    plugin: id,
                    key: String::new(),
                    expected: "a map",
                    found: describe(&other),
                });
            }
        };

        let mut config = Self::new(id, String::new());
        for (key, value) in map {
            config.settings.insert(key.to_lowercase(), value);
        }
        match config.settings.remove(TYPE_KEY) {
            Some(Value::String(type_name)) if !type_name.is_empty() => {
                config.type_name = type_name;
                Ok(config)
            }
            Some(other) => Err(ConfigError::InvalidOption {
                plugin: config.id,
                key: "Type".into(),
                expected: "a string",
                found: describe(&other),
            }),
            None => Err(ConfigError::MissingType(config.id)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Set an option, replacing any previous value.
    pub fn override_option(&mut self, key: &str, value: impl Into<Value>) {
        self.settings.insert(key.to_lowercase(), value.into());
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.override_option(key, value);
        self
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.settings.get(&key.to_lowercase())
    }

    pub fn options(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.settings.iter()
    }
}

// -----------------------------------------------------------------------------
// Nested specs
// -----------------------------------------------------------------------------

/// One entry of a modulator list.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedSpec {
    Name(String),
    Override { type_name: String, settings: Map<String, Value> },
}

impl NestedSpec {
    /// `key` is only used to produce a helpful error.
    pub fn parse(key: &str, value: &Value) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedNestedSpec {
            key: key.to_string(),
            reason,
        };

        match value {
            Value::String(name) if !name.is_empty() => Ok(NestedSpec::Name(name.clone())),
            Value::Object(map) if map.len() == 1 => {
                let (type_name, overrides) = map
                    .iter()
                    .next()
                    .ok_or_else(|| malformed("empty map".into()))?;
                let settings = match overrides {
                    Value::Object(settings) => settings.clone(),
                    // `- format.Foo:` without options
                    Value::Null => Map::new(),
                    other => {
                        return Err(malformed(format!(
                            "overrides for '{}' must be a map, found {}",
                            type_name,
                            describe(other)
                        )));
                    }
                };
                Ok(NestedSpec::Override { type_name: type_name.clone(), settings })
            }
            Value::Object(map) => Err(malformed(format!(
                "expected a single plugin type per entry, found {} keys",
                map.len()
            ))),
            other => Err(malformed(format!(
                "expected a type name or a single-key map, found {}",
                describe(other)
            ))),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            NestedSpec::Name(name) => name,
            NestedSpec::Override { type_name, .. } => type_name,
        }
    }

    /// Synthesize the configuration of the nested plugin. A bare name gets an
    /// empty override map, i.e. defaults for every option.
    pub fn into_config(self, id: impl Into<String>) -> PluginConfig {
        match self {
            NestedSpec::Name(type_name) => PluginConfig::new(id, type_name),
            NestedSpec::Override { type_name, settings } => {
                let mut config = PluginConfig::new(id, type_name);
                for (key, value) in settings {
                    config.override_option(&key, value);
                }
                config
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Reader
// -----------------------------------------------------------------------------

/// Typed, read-only view on a [`PluginConfig`].
///
/// Every getter takes a default that is returned when the option is absent.
/// Only a present value of the wrong shape is an error. The reader remembers
/// which keys were read so unknown options can be reported afterwards.
#[derive(Debug)]
pub struct PluginConfigReader<'a> {
    config: &'a PluginConfig,
    read: HashSet<String>,
}

impl<'a> PluginConfigReader<'a> {
    pub fn new(config: &'a PluginConfig) -> Self {
        Self { config, read: HashSet::new() }
    }

    pub fn id(&self) -> &str {
        self.config.id()
    }

    pub fn type_name(&self) -> &str {
        self.config.type_name()
    }

    pub fn config(&self) -> &'a PluginConfig {
        self.config
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.config.option(key).is_some()
    }

    pub fn get_value(&mut self, key: &str) -> Option<&'a Value> {
        let config: &'a PluginConfig = self.config;
        let key = key.to_lowercase();
        let value = config.settings.get(&key);
        self.read.insert(key);
        value
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &Value) -> ConfigError {
        ConfigError::InvalidOption {
            plugin: if self.id().is_empty() { self.type_name().to_string() } else { self.id().to_string() },
            key: key.to_string(),
            expected,
            found: describe(found),
        }
    }

    pub fn get_string(&mut self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get_value(key) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.mismatch(key, "a string", other)),
        }
    }

    pub fn get_int(&mut self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get_value(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value @ Value::Number(n)) => n.as_i64().ok_or_else(|| self.mismatch(key, "an integer", value)),
            Some(other) => Err(self.mismatch(key, "an integer", other)),
        }
    }

    pub fn get_uint(&mut self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.get_value(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value @ Value::Number(n)) => {
                n.as_u64().ok_or_else(|| self.mismatch(key, "a non-negative integer", value))
            }
            Some(other) => Err(self.mismatch(key, "a non-negative integer", other)),
        }
    }

    pub fn get_float(&mut self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get_value(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value @ Value::Number(n)) => n.as_f64().ok_or_else(|| self.mismatch(key, "a number", value)),
            Some(other) => Err(self.mismatch(key, "a number", other)),
        }
    }

    pub fn get_bool(&mut self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get_value(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.mismatch(key, "a bool", other)),
        }
    }

    pub fn get_string_array(&mut self, key: &str, default: &[&str]) -> Result<Vec<String>, ConfigError> {
        let items = match self.get_value(key) {
            None | Some(Value::Null) => return Ok(default.iter().map(|s| s.to_string()).collect()),
            Some(Value::Array(items)) => items,
            Some(other) => return Err(self.mismatch(key, "a list of strings", other)),
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(self.mismatch(key, "a list of strings", other)),
            })
            .collect()
    }

    /// Normalize a modulator list into one synthesized configuration per entry.
    /// An absent option yields an empty list.
    pub fn get_nested_specs(&mut self, key: &str) -> Result<Vec<PluginConfig>, ConfigError> {
        let items = match self.get_value(key) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items.as_slice(),
            // a single entry is accepted as a list of one
            Some(single @ (Value::String(_) | Value::Object(_))) => std::slice::from_ref(single),
            Some(other) => return Err(self.mismatch(key, "a list of plugin specs", other)),
        };

        let parent = if self.id().is_empty() { self.type_name() } else { self.id() };
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let spec = NestedSpec::parse(key, item)?;
                Ok(spec.into_config(format!("{}.{}[{}]", parent, key, idx)))
            })
            .collect()
    }

    /// Options that are set but were never read.
    pub fn unused_keys(&self) -> Vec<String> {
        let mut unused: Vec<String> = self
            .config
            .settings
            .keys()
            .filter(|key| !self.read.contains(*key))
            .cloned()
            .collect();
        unused.sort();
        unused
    }
}
