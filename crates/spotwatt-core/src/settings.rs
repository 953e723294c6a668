//! Host settings consumed by price acquisition.
//!
//! The core only depends on [`SettingsProvider`]. Two adapters ship with the
//! crate: [`MemorySettings`] for embedding and tests, and
//! [`JsonFileSettings`] backed by a JSON object on disk (used by the CLI).

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Setting keys read by the zone resolver and the orchestrator.
pub mod keys {
    pub const ENTSOE_TOKEN: &str = "entsoe_token";
    pub const ENTSOE_AREA_MAP: &str = "entsoe_area_map";
    pub const ENTSOE_AREA: &str = "entsoe_area";
    pub const PRICE_COUNTRY: &str = "price_country";
    pub const FX_RATE: &str = "fx_rate";
    pub const USE_FX_CONVERSION: &str = "use_fx_conversion";
}

/// Environment variable holding the platform security token.
pub const TOKEN_ENV: &str = "SPOTWATT_ENTSOE_TOKEN";
const TOKEN_ENV_FALLBACK: &str = "ENTSOE_TOKEN";

/// Reads the security token from the environment, ignoring blank values.
pub fn token_from_env() -> Option<String> {
    env::var(TOKEN_ENV)
        .or_else(|_| env::var(TOKEN_ENV_FALLBACK))
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Narrow, loosely typed view of the host's settings store.
pub trait SettingsProvider: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn get_number(&self, key: &str) -> Option<f64>;

    /// JSON object stored under `key`; non-object values read as `None`.
    fn get_object(&self, key: &str) -> Option<Value>;

    /// Boolean flag; accepts `true`/`yes`/`on`/`1` strings and non-zero numbers.
    fn get_flag(&self, key: &str) -> bool {
        if let Some(value) = self.get_string(key) {
            return matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1"
            );
        }
        self.get_number(key).is_some_and(|value| value != 0.0)
    }

    /// Non-blank trimmed string.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get_string(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }
}

/// Lookups shared by the JSON-backed adapters.
fn string_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(value) => Some(value.clone()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn number_of(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(value) => value.as_f64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

fn object_of(value: Option<&Value>) -> Option<Value> {
    value.filter(|value| value.is_object()).cloned()
}

/// In-memory settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySettings {
    values: BTreeMap<String, Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

impl SettingsProvider for MemorySettings {
    fn get_string(&self, key: &str) -> Option<String> {
        string_of(self.values.get(key))
    }

    fn get_number(&self, key: &str) -> Option<f64> {
        number_of(self.values.get(key))
    }

    fn get_object(&self, key: &str) -> Option<Value> {
        object_of(self.values.get(key))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {message}")]
    Io { path: PathBuf, message: String },

    #[error("settings file '{path}' is not valid JSON: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("settings file '{path}' must contain a JSON object")]
    NotAnObject { path: PathBuf },
}

/// Settings read once from a JSON object file.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: serde_json::Map<String, Value>,
}

impl JsonFileSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path).map_err(|e| SettingsError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Self::parse(path, &raw)
    }

    /// Like [`JsonFileSettings::load`], but a missing file yields empty settings.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                values: serde_json::Map::new(),
            });
        }
        Self::load(path)
    }

    fn parse(path: PathBuf, raw: &str) -> Result<Self, SettingsError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| SettingsError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        match value {
            Value::Object(values) => Ok(Self { path, values }),
            _ => Err(SettingsError::NotAnObject { path }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for JsonFileSettings {
    fn get_string(&self, key: &str) -> Option<String> {
        string_of(self.values.get(key))
    }

    fn get_number(&self, key: &str) -> Option<f64> {
        number_of(self.values.get(key))
    }

    fn get_object(&self, key: &str) -> Option<Value> {
        object_of(self.values.get(key))
    }
}
