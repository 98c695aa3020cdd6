//! Layered configuration sources.
//!
//! # Responsibilities
//! - Collect flat key/value settings from defaults, a TOML file, the process
//!   environment and command-line overrides
//! - Normalize keys so every source spells the same setting the same way
//! - Answer lookups with "last layer wins" precedence
//!
//! # Design Decisions
//! - Keys are case-insensitive; `__`, `:` and `.` separate sections
//! - `_` and `-` inside a segment are ignored, so `OTLP_ENDPOINT_URL`,
//!   `otlp_endpoint_url` and `OtlpEndpointUrl` are one key
//! - Values are kept as raw strings; typing happens in `loader.rs`

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

use crate::config::ConfigError;

/// Normalize a setting key into its canonical `section:key` form.
pub fn normalize_key(raw: &str) -> String {
    raw.replace("__", ":")
        .replace('.', ":")
        .split(':')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .chars()
                .filter(|c| *c != '_' && *c != '-')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(":")
}

/// One named layer of settings.
#[derive(Debug, Clone)]
struct Layer {
    name: String,
    values: BTreeMap<String, String>,
}

/// Ordered stack of configuration layers. Later layers override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    layers: Vec<Layer>,
}

impl ConfigSources {
    /// Create an empty source stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a layer built from arbitrary key/value pairs.
    pub fn with_layer<I, K, V>(mut self, name: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (normalize_key(k.as_ref()), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        self.layers.push(Layer {
            name: name.into(),
            values,
        });
        self
    }

    /// Push the built-in defaults layer.
    pub fn with_defaults(self) -> Self {
        self.with_layer("defaults", super::schema::default_settings())
    }

    /// Push a layer parsed from TOML text. Nested tables are flattened.
    pub fn with_toml_str(self, name: impl Into<String>, content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse().map_err(ConfigError::Parse)?;
        let mut pairs = Vec::new();
        flatten_toml("", &toml::Value::Table(table), &mut pairs);
        Ok(self.with_layer(name, pairs))
    }

    /// Push a layer read from a TOML file on disk.
    pub fn with_toml_file(self, path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.with_toml_str(path.display().to_string(), &content)
    }

    /// Push a layer holding the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn with_environment(self) -> Self {
        self.with_layer("environment", environment_pairs(std::env::vars_os()))
    }

    /// Look up a setting. The last layer that defines it wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.values.get(&key))
            .map(String::as_str)
    }

    /// Name of the layer that supplied `key`, for diagnostics.
    pub fn origin(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.values.contains_key(&key))
            .map(|layer| layer.name.as_str())
    }

    /// Whether any layer defines at least one key inside `section`.
    pub fn has_section(&self, section: &str) -> bool {
        let prefix = format!("{}:", normalize_key(section));
        self.layers
            .iter()
            .any(|layer| layer.values.keys().any(|k| k.starts_with(&prefix)))
    }

    /// Number of layers in the stack.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

fn environment_pairs(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (Ok(name), Err(_)) => {
                tracing::warn!(variable = %name, "Skipping environment variable with a non UTF-8 value");
                None
            }
            (Err(name), _) => {
                tracing::warn!(variable = %name.to_string_lossy(), "Skipping environment variable with a non UTF-8 name");
                None
            }
        })
        .collect()
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}:{key}")
                };
                flatten_toml(&path, child, out);
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        toml::Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            out.push((prefix.to_string(), joined));
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}
