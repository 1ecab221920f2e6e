//! Untyped provider settings and typed accessors over them.
//!
//! Every provider family (archiving, storage, notification) is constructed
//! from a symbolic kind plus a free-form settings map. Concrete providers pull
//! only the keys they need through these helpers, so a missing or mistyped
//! entry surfaces as a configuration error naming the key.

use std::sync::Arc;

use serde_json::Value;

use crate::{Error, Result};

/// Free-form provider settings, as declared in the configuration file.
pub type ProviderConfig = serde_json::Map<String, Value>;

/// A provider instance together with the name it was declared under.
pub struct Bound<P: ?Sized> {
    pub name: String,
    pub provider: Arc<P>,
}

impl<P: ?Sized> Bound<P> {
    pub fn new(name: impl Into<String>, provider: Arc<P>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

impl<P: ?Sized> Clone for Bound<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            provider: Arc::clone(&self.provider),
        }
    }
}

/// Read a required, non-empty string setting.
pub fn required_str<'a>(config: &'a ProviderConfig, key: &str) -> Result<&'a str> {
    match config.get(key) {
        None | Some(Value::Null) => Err(Error::missing_setting(key)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(Error::missing_setting(key)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(Error::invalid_setting(key, "a string")),
    }
}

/// Read an optional string setting. Empty strings are treated as absent.
pub fn optional_str<'a>(config: &'a ProviderConfig, key: &str) -> Result<Option<&'a str>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(Error::invalid_setting(key, "a string")),
    }
}

/// Read an optional boolean setting, falling back to `default`.
pub fn optional_bool(config: &ProviderConfig, key: &str, default: bool) -> Result<bool> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(Error::invalid_setting(key, "a boolean")),
    }
}

/// Read an optional unsigned integer setting, falling back to `default`.
pub fn optional_u32(config: &ProviderConfig, key: &str, default: u32) -> Result<u32> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::invalid_setting(key, "a non-negative integer")),
        Some(_) => Err(Error::invalid_setting(key, "a non-negative integer")),
    }
}
