//! # Attribute definitions
//!
//! Declared attributes of a component type: name, type, visibility and an
//! optional default in configuration form (a JSON literal or an expression
//! string such as `"{!v.label}"`).

use crate::error::{AttributeError, AttributeResult};
use serde::{Deserialize, Serialize};
use trellis_common::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    List,
    #[default]
    Object,
    Component,
    /// A facet: list of components
    ComponentList,
}

impl AttributeType {
    /// List-like types accept a scalar by wrapping it in a one-element list
    pub fn is_list(&self) -> bool {
        matches!(self, AttributeType::List | AttributeType::ComponentList)
    }

    /// Whether `value` has the native shape of this type. Lazy values are
    /// never validated.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_lazy() {
            return true;
        }
        match self {
            AttributeType::Object => true,
            AttributeType::String => matches!(value, Value::String(_)),
            AttributeType::Number => matches!(value, Value::Number(_)),
            AttributeType::Boolean => matches!(value, Value::Boolean(_)),
            AttributeType::List | AttributeType::ComponentList => value.is_list(),
            AttributeType::Component => matches!(value, Value::Component(_)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Global,
    #[default]
    Public,
    Private,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub required: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            default: None,
            visibility: Visibility::default(),
            required: false,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Attribute definitions of one component type, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeDefSet {
    defs: Vec<AttributeDef>,
}

impl AttributeDefSet {
    pub fn new(defs: Vec<AttributeDef>) -> Self {
        let mut set = Self::default();
        for def in defs {
            set.insert(def);
        }
        set
    }

    /// Parses a JSON array of definitions
    pub fn from_json(json: &serde_json::Value) -> AttributeResult<Self> {
        let defs: Vec<AttributeDef> = serde_json::from_value(json.clone())
            .map_err(|e| AttributeError::InvalidDefinitions(e.to_string()))?;
        Ok(Self::new(defs))
    }

    /// Adds a definition, replacing an earlier one with the same name
    pub fn insert(&mut self, def: AttributeDef) {
        match self.defs.iter_mut().find(|d| d.name == def.name) {
            Some(existing) => *existing = def,
            None => self.defs.push(def),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.iter().map(|d| d.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDef> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
