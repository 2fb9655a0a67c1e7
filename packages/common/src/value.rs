//! # Runtime values
//!
//! `Value` is the dynamic value stored in attribute slots, global providers and
//! iteration item lists.
//!
//! ## Identity
//!
//! Containers (`List`, `Map`) are shared, mutable and compared by **identity**:
//! two lists with the same contents built separately are different values.
//! Primitives compare by value. This is the comparison used by the iteration
//! reconciler to match items and by the expression service to skip redundant
//! global updates.
//!
//! ## Lazy values
//!
//! A slot may hold a [`LazyValue`] instead of data: a property reference into
//! another provider, or a computed (function-call) value. Readers evaluate
//! lazy values on access unless they explicitly ask for the raw slot.

use crate::ids::ComponentId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type MapRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// What a lazy value does when it is read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyKind {
    /// Reference to an expression in another provider. Writes through a
    /// non-global reference land in the referenced provider.
    Reference { global: bool },
    /// Computed value. Constant from the point of view of the slot holding it.
    FunctionCall,
}

/// A value that is produced on demand
pub trait LazyValue: fmt::Debug {
    fn evaluate(&self) -> Value;

    fn kind(&self) -> LazyKind;

    /// Write through to whatever the value points at. Returns false when the
    /// value cannot be assigned.
    fn assign(&self, _value: Value) -> bool {
        false
    }

    /// `(scope, expression)` for references, `None` for everything else
    fn reference_key(&self) -> Option<(Option<ComponentId>, &str)> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    List(ListRef),
    Map(MapRef),
    Component(ComponentId),
    Lazy(Rc<dyn LazyValue>),
}

impl Value {
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Rc::new(RefCell::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    pub fn empty_map() -> Self {
        Value::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn empty_list() -> Self {
        Value::List(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn lazy(value: impl LazyValue + 'static) -> Self {
        Value::Lazy(Rc::new(value))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_undefined_or_null(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Value::Lazy(_))
    }

    pub fn lazy_kind(&self) -> Option<LazyKind> {
        match self {
            Value::Lazy(lazy) => Some(lazy.kind()),
            _ => None,
        }
    }

    pub fn is_function_call(&self) -> bool {
        self.lazy_kind() == Some(LazyKind::FunctionCall)
    }

    pub fn as_lazy(&self) -> Option<&Rc<dyn LazyValue>> {
        match self {
            Value::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_component(&self) -> Option<ComponentId> {
        match self {
            Value::Component(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined | Value::Null | Value::Boolean(_) | Value::Number(_) | Value::String(_)
        )
    }

    /// Number of entries for lists, `None` otherwise
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(list.borrow().len()),
            _ => None,
        }
    }

    /// Snapshot of a list's items (empty for anything else)
    pub fn items(&self) -> Vec<Value> {
        match self {
            Value::List(list) => list.borrow().clone(),
            _ => Vec::new(),
        }
    }

    /// Evaluates lazy values, clones everything else
    pub fn evaluated(&self) -> Value {
        match self {
            Value::Lazy(lazy) => lazy.evaluate(),
            other => other.clone(),
        }
    }

    /// Strict equality: primitives by value, containers and lazy values by identity
    pub fn same_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Component(a), Value::Component(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Lazy(a), Value::Lazy(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) | Value::Component(_) | Value::Lazy(_) => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Boolean(true) => 1.0,
            Value::Boolean(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// `+` with script semantics: numeric addition unless either side is a
    /// string or a container, in which case both sides are concatenated.
    pub fn add(&self, other: &Value) -> Value {
        let numeric = |v: &Value| {
            matches!(
                v,
                Value::Undefined | Value::Null | Value::Boolean(_) | Value::Number(_)
            )
        };
        if numeric(self) && numeric(other) {
            Value::Number(self.to_number() + other.to_number())
        } else {
            Value::String(format!(
                "{}{}",
                self.to_display_string(),
                other.to_display_string()
            ))
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::List(list) => list
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => "[object Object]".to_string(),
            Value::Component(id) => format!("component:{}", id),
            Value::Lazy(lazy) => lazy.evaluate().to_display_string(),
        }
    }

    /// Builds fresh containers from JSON
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::list(items.iter().map(Value::from_json)),
            serde_json::Value::Object(entries) => {
                Value::map(entries.iter().map(|(k, v)| (k.clone(), Value::from_json(v))))
            }
        }
    }

    /// Plain-data snapshot. Lazy values are evaluated; components have no
    /// JSON form and serialise as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Component(_) => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(list) => {
                serde_json::Value::Array(list.borrow().iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Lazy(lazy) => lazy.evaluate().to_json(),
        }
    }
}

/// Whole numbers keep their integer form; fractions and non-finite values
/// go through `from_f64` (`null` for NaN and infinities).
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 {
        if n >= i64::MIN as f64 && n < i64::MAX as f64 {
            return serde_json::Value::from(n as i64);
        }
        if n >= 0.0 && n < u64::MAX as f64 {
            return serde_json::Value::from(n as u64);
        }
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ComponentId> for Value {
    fn from(id: ComponentId) -> Self {
        Value::Component(id)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

/// Computed (function-call) value
pub struct Computed {
    label: String,
    compute: Box<dyn Fn() -> Value>,
}

impl Computed {
    pub fn new(label: impl Into<String>, compute: impl Fn() -> Value + 'static) -> Self {
        Self {
            label: label.into(),
            compute: Box::new(compute),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed").field("label", &self.label).finish()
    }
}

impl LazyValue for Computed {
    fn evaluate(&self) -> Value {
        (self.compute)()
    }

    fn kind(&self) -> LazyKind {
        LazyKind::FunctionCall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_for_containers() {
        let a = Value::list([Value::from(1), Value::from(2)]);
        let b = Value::list([Value::from(1), Value::from(2)]);

        assert!(a.same_identity(&a.clone()));
        assert!(!a.same_identity(&b));
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn test_identity_for_primitives() {
        assert_eq!(Value::from("x"), Value::from("x"));
        assert_eq!(Value::from(3), Value::Number(3.0));
        assert_ne!(Value::Undefined, Value::Null);
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_add_follows_script_semantics() {
        assert_eq!(Value::from(2).add(&Value::from(3)), Value::from(5));
        assert_eq!(Value::from("a").add(&Value::from(1)), Value::from("a1"));
        assert_eq!(Value::from("label").add(&Value::from("")), Value::from("label"));
        assert_eq!(Value::Null.add(&Value::from(true)), Value::from(1));
    }

    #[test]
    fn test_json_bridge() {
        let json = json!({"a": [1, "two", null], "b": {"c": true}});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_numbers_keep_integer_form() {
        assert_eq!(Value::from(7).to_json().to_string(), "7");
        assert_eq!(Value::from(-3.0).to_json().to_string(), "-3");
        assert_eq!(Value::from(1.5).to_json().to_string(), "1.5");
        assert_eq!(Value::from(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::from(1e300).to_json().as_f64(), Some(1e300));
    }

    #[test]
    fn test_computed_is_function_call() {
        let value = Value::lazy(Computed::new("answer", || Value::from(42)));
        assert!(value.is_function_call());
        assert_eq!(value.evaluated(), Value::from(42));
    }
}
