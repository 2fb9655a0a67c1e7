//! Global value providers: named sources of process-wide values such as
//! browser facts, labels and locale settings.

use crate::error::{GlobalsError, GlobalsResult};
use tracing::debug;
use trellis_common::{put, resolve_path, Value};

pub trait GlobalValueProvider {
    /// Merges a payload of new values into the provider
    fn merge(&mut self, values: &serde_json::Value) -> GlobalsResult<()>;

    /// Provider-specific lookup of `path` (relative to the provider). `None`
    /// falls back to plain path resolution against [`values`](Self::values).
    fn get(&self, _path: &[&str]) -> Option<Value> {
        None
    }

    /// Writes `value` at `path`. Returns false when the provider is read-only.
    fn set(&mut self, _path: &[&str], _value: Value) -> bool {
        false
    }

    fn values(&self) -> Value;

    /// Values written to persistent storage
    fn storable_values(&self) -> serde_json::Value {
        self.values().to_json()
    }

    fn is_storable(&self) -> bool {
        true
    }
}

/// Plain bag of values. Merges are shallow: top-level keys are replaced.
#[derive(Debug)]
pub struct ObjectValueProvider {
    name: String,
    values: Value,
}

impl ObjectValueProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Value::empty_map(),
        }
    }

    pub fn with_values(name: impl Into<String>, values: &serde_json::Value) -> GlobalsResult<Self> {
        let mut provider = Self::new(name);
        provider.merge(values)?;
        Ok(provider)
    }
}

impl GlobalValueProvider for ObjectValueProvider {
    fn merge(&mut self, values: &serde_json::Value) -> GlobalsResult<()> {
        let entries = match values {
            serde_json::Value::Object(entries) => entries,
            serde_json::Value::Null => return Ok(()),
            other => {
                return Err(GlobalsError::InvalidPayload {
                    provider: self.name.clone(),
                    message: format!("expected an object, got {}", other),
                })
            }
        };
        for (key, value) in entries {
            put(&self.values, key, Value::from_json(value));
        }
        Ok(())
    }

    fn set(&mut self, path: &[&str], value: Value) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        put(&resolve_path(parents, &self.values, false), last, value)
    }

    fn values(&self) -> Value {
        self.values.clone()
    }
}

/// Two-level `section.name` labels.
///
/// A missing label resolves to the placeholder `[section.name]`.
#[derive(Debug)]
pub struct LabelValueProvider {
    values: Value,
}

impl Default for LabelValueProvider {
    fn default() -> Self {
        Self {
            values: Value::empty_map(),
        }
    }
}

impl LabelValueProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder(section: &str, name: &str) -> String {
        format!("[{}.{}]", section, name)
    }
}

impl GlobalValueProvider for LabelValueProvider {
    fn merge(&mut self, values: &serde_json::Value) -> GlobalsResult<()> {
        let sections = match values {
            serde_json::Value::Object(sections) => sections,
            serde_json::Value::Null => return Ok(()),
            other => {
                return Err(GlobalsError::InvalidPayload {
                    provider: "$Label".to_string(),
                    message: format!("expected sections, got {}", other),
                })
            }
        };
        for (section, labels) in sections {
            match labels {
                serde_json::Value::Object(labels) => {
                    let existing = resolve_path(&[section.as_str()], &self.values, false);
                    let target = if existing.is_map() {
                        existing
                    } else {
                        let created = Value::empty_map();
                        put(&self.values, section, created.clone());
                        created
                    };
                    for (name, label) in labels {
                        put(&target, name, Value::from_json(label));
                    }
                }
                other => {
                    put(&self.values, section, Value::from_json(other));
                }
            }
        }
        Ok(())
    }

    fn get(&self, path: &[&str]) -> Option<Value> {
        let [section, name] = path else {
            return None;
        };
        let value = resolve_path(path, &self.values, false);
        if value.is_undefined() {
            debug!(section, name, "label not found");
            return Some(Value::String(Self::placeholder(section, name)));
        }
        Some(value)
    }

    fn values(&self) -> Value {
        self.values.clone()
    }
}
