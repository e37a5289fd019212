//! Typed access to an action's merged config map.
//!
//! Scripts are hand-written, so keys are accepted in both `snake_case` and
//! `camelCase`, and scalar values may arrive as strings.

use serde_json::{Map, Value};

/// Read-only view over an action's merged config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionConfig {
    values: Map<String, Value>,
}

fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl ActionConfig {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_raw(self) -> Map<String, Value> {
        self.values
    }

    /// Value under `key` or its camelCase form. `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| {
                self.values
                    .get(&to_camel_case(key))
                    .filter(|v| !v.is_null())
            })
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Non-empty string value.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// First non-empty string among `keys`.
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.str(k))
    }

    pub fn u32(&self, key: &str) -> Option<u32> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Array value; a missing key reads as empty.
    pub fn array(&self, key: &str) -> &[Value] {
        self.get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
