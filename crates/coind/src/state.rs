//! Process-wide controller configuration.
//!
//! A flat map of string keys to JSON values. `"mode"` is the only key with
//! defined semantics; the server core owns writes to it, everything else
//! only reads. The map is passed by reference, never shared globally.

use serde_json::Value;
use std::collections::BTreeMap;

/// Key under which the operating mode description is kept.
pub const MODE_KEY: &str = "mode";

#[derive(Debug, Clone, Default)]
pub struct CoinConfig {
    values: BTreeMap<String, Value>,
}

impl CoinConfig {
    pub fn new() -> Self {
        let mut values = BTreeMap::new();
        values.insert(MODE_KEY.to_string(), Value::Null);
        Self { values }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Sets `name` only if it has never been set.
    pub fn set_if_none(&mut self, name: &str, value: impl Into<Value>) {
        self.values
            .entry(name.to_string())
            .or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The mode as reported to clients; `"None"` until a driver sets it.
    pub fn mode(&self) -> String {
        match self.values.get(MODE_KEY) {
            Some(Value::String(mode)) => mode.clone(),
            Some(Value::Null) | None => "None".to_string(),
            Some(other) => other.to_string(),
        }
    }
}
