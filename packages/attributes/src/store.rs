//! # Attribute Store
//!
//! Per-component storage of attribute values.
//!
//! ## Purpose
//!
//! - Path-qualified reads and writes (`items.0.label`) with capability checks
//! - Decorator chains: computed values layered over a stored value, evaluated
//!   in registration order, guarded against reentrant reads
//! - Shadow values added to computed slots
//! - Re-initialisation from configuration and declared defaults
//! - Idempotent teardown that destroys owned child components
//!
//! The `body` attribute is special: it is a map of bodies keyed by the id of
//! each component in the inheritance chain, so `body` paths are rewritten to
//! `body.<owner>`.

use crate::access::{AccessControl, AccessPolicy, AllowAll};
use crate::def::AttributeDefSet;
use crate::error::{AttributeError, AttributeResult};
use crate::factory::{LiteralValueFactory, ValueFactory};
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, trace};
use trellis_common::{
    container_for, lookup, put, resolve_path, split_path, try_put, ComponentHost, ComponentId,
    ErrorReporter, LazyKind, MapRef, TracingReporter, Value,
};

pub const BODY: &str = "body";

/// Evaluation state of a decorator chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    Evaluating,
}

#[derive(Debug)]
struct DecoratorChain {
    decorators: RefCell<Vec<Value>>,
    state: Cell<ChainState>,
    /// Result of the most recently evaluated decorator while `Evaluating`
    partial: RefCell<Value>,
}

/// Resets the chain to `Idle` even if a decorator panics
struct EvaluatingGuard<'a>(&'a DecoratorChain);

impl Drop for EvaluatingGuard<'_> {
    fn drop(&mut self) {
        self.0.state.set(ChainState::Idle);
        *self.0.partial.borrow_mut() = Value::Undefined;
    }
}

impl DecoratorChain {
    fn new() -> Self {
        Self {
            decorators: RefCell::new(Vec::new()),
            state: Cell::new(ChainState::Idle),
            partial: RefCell::new(Value::Undefined),
        }
    }

    fn evaluate(&self, initial: Value) -> Value {
        if self.state.get() == ChainState::Evaluating {
            return self.partial.borrow().clone();
        }

        self.state.set(ChainState::Evaluating);
        let _guard = EvaluatingGuard(self);
        *self.partial.borrow_mut() = initial.clone();

        let decorators = self.decorators.borrow().clone();
        let mut value = initial;
        for decorator in decorators {
            value = decorator.evaluated();
            *self.partial.borrow_mut() = value.clone();
        }
        value
    }
}

/// What a `set` did with the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Stored in the slot
    Assigned,
    /// Forwarded to the property reference held by the slot
    Delegated,
    /// Not applied (constant computed slot, or no container at the path)
    Rejected,
}

pub struct AttributeStore {
    values: MapRef,
    shadow_values: RefCell<HashMap<String, Value>>,
    decorators: RefCell<HashMap<String, Rc<DecoratorChain>>>,
    defs: RefCell<Rc<AttributeDefSet>>,
    access: Rc<dyn AccessControl>,
    policy: AccessPolicy,
    reporter: Rc<dyn ErrorReporter>,
    factory: Rc<dyn ValueFactory>,
    destroyed: Cell<bool>,
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("values", &self.values)
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl AttributeStore {
    pub fn new(defs: Rc<AttributeDefSet>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(BODY.to_string(), Value::empty_map());
        Self {
            values: Rc::new(RefCell::new(values)),
            shadow_values: RefCell::new(HashMap::new()),
            decorators: RefCell::new(HashMap::new()),
            defs: RefCell::new(defs),
            access: Rc::new(AllowAll),
            policy: AccessPolicy::default(),
            reporter: Rc::new(TracingReporter),
            factory: Rc::new(LiteralValueFactory),
            destroyed: Cell::new(false),
        }
    }

    pub fn with_access(mut self, access: Rc<dyn AccessControl>, policy: AccessPolicy) -> Self {
        self.access = access;
        self.policy = policy;
        self
    }

    pub fn with_reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_factory(mut self, factory: Rc<dyn ValueFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn defs(&self) -> Rc<AttributeDefSet> {
        self.defs.borrow().clone()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.values.borrow().contains_key(name)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Declared default of an attribute, in configuration form
    pub fn get_default(&self, name: &str) -> Option<serde_json::Value> {
        self.defs.borrow().get(name).and_then(|def| def.default.clone())
    }

    fn root(&self) -> Value {
        Value::Map(self.values.clone())
    }

    fn raw(&self, key: &str) -> Value {
        self.values.borrow().get(key).cloned().unwrap_or_default()
    }

    fn check_access(
        &self,
        operation: &'static str,
        attribute: &str,
        owner: ComponentId,
    ) -> AttributeResult<()> {
        let defs = self.defs();
        if self.access.allow_access(defs.get(attribute), owner) {
            return Ok(());
        }

        let err = AttributeError::AccessDenied {
            operation,
            attribute: attribute.to_string(),
            component: owner.to_string(),
            accessor: self.access.current_access(),
        };
        if self.policy.enable_access_checks {
            if self.policy.log_access_failures {
                self.reporter.error(&err.to_string());
            }
            return Err(err);
        }
        if self.policy.log_access_failures {
            self.reporter.warning(&err.to_string());
        }
        Ok(())
    }

    /// Single-segment read through the decorator chain, if any
    fn decorated(&self, key: &str) -> Value {
        let chain = self.decorators.borrow().get(key).cloned();
        let raw = self.raw(key);
        match chain {
            Some(chain) => {
                trace!(attribute = key, "evaluating decorator chain");
                chain.evaluate(raw)
            }
            None => raw,
        }
    }

    fn apply_shadow(&self, key: &str, value: Value) -> Value {
        let has_shadow = self.shadow_values.borrow().contains_key(key);
        if has_shadow {
            value.add(&self.get_shadow_value(key))
        } else {
            value
        }
    }

    /// Reads an attribute or a path inside one
    pub fn get(&self, path: &str, owner: ComponentId) -> AttributeResult<Value> {
        let key = qualify_body(path, owner);
        let segments = split_path(&key);
        let attribute = segments.first().copied().unwrap_or_default();
        self.check_access("get", attribute, owner)?;

        let value = if segments.len() <= 1 {
            self.decorated(&key)
        } else {
            resolve_path(&segments, &self.root(), false)
        };
        Ok(self.apply_shadow(&key, value.evaluated()))
    }

    /// Body of one component in the inheritance chain, without access checks
    pub fn get_body(&self, owner: ComponentId) -> Value {
        let key = format!("{}.{}", BODY, owner);
        let body = lookup(&self.raw(BODY), &owner.to_string());
        self.apply_shadow(&key, body.evaluated())
    }

    /// Single attribute read without path parsing or access checks
    pub fn get_value(&self, name: &str) -> Value {
        let value = self.decorated(name).evaluated();
        self.apply_shadow(name, value)
    }

    /// Raw slot content at `path` (lazy values are not evaluated)
    pub fn get_raw(&self, path: &str) -> Value {
        resolve_path(&split_path(path), &self.root(), true)
    }

    pub fn get_shadow_value(&self, key: &str) -> Value {
        if self.get_raw(key).is_function_call() {
            return self
                .shadow_values
                .borrow()
                .get(key)
                .cloned()
                .unwrap_or_else(|| Value::from(""));
        }
        Value::Undefined
    }

    /// Records a shadow value. Only computed slots accept one.
    pub fn set_shadow_value(&self, key: &str, value: Value) {
        if self.get_raw(key).is_function_call() {
            self.shadow_values.borrow_mut().insert(key.to_string(), value);
        }
    }

    /// Writes an attribute or a path inside one
    pub fn set(&self, path: &str, value: Value, owner: ComponentId) -> AttributeResult<SetOutcome> {
        let key = qualify_body(path, owner);
        let segments = split_path(&key);
        let Some((last, parents)) = segments.split_last() else {
            return Ok(SetOutcome::Rejected);
        };
        let attribute = parents.first().unwrap_or(last);
        self.check_access("set", attribute, owner)?;

        let mut value = value;
        if !value.is_undefined_or_null()
            && !self.is_value_valid_for_attribute(&key, &value)
            && self.is_type_of_array(&key)
            && !value.is_list()
        {
            debug!(attribute = %attribute, "wrapping scalar into list");
            value = Value::list([value]);
        }

        let mut target = self.root();
        for (i, step) in parents.iter().enumerate() {
            let next_step = segments[i + 1];
            let next_target = lookup(&target, step);
            target = if next_target.is_undefined() {
                let created = container_for(next_step);
                if !try_put(&target, step, created.clone())? {
                    debug!(path = %key, "no container to set into");
                    return Ok(SetOutcome::Rejected);
                }
                created
            } else {
                next_target.evaluated()
            };
        }

        let existing = lookup(&target, last);
        match existing.as_lazy() {
            Some(reference) if reference.kind() == (LazyKind::Reference { global: false }) => {
                reference.assign(value);
                Ok(SetOutcome::Delegated)
            }
            Some(computed) if computed.kind() == LazyKind::FunctionCall => {
                self.reporter.warning(&format!(
                    "AttributeStore.set(): unable to override the value for '{}'. Computed values declared in markup are constant.",
                    key
                ));
                Ok(SetOutcome::Rejected)
            }
            _ => {
                if try_put(&target, last, value)? {
                    Ok(SetOutcome::Assigned)
                } else {
                    debug!(path = %key, "no container to set into");
                    Ok(SetOutcome::Rejected)
                }
            }
        }
    }

    /// Clears the property reference held at `path` and returns it
    pub fn clear_reference(&self, path: &str) -> Option<Value> {
        let segments = split_path(path);
        let (last, parents) = segments.split_last()?;
        let target = if parents.is_empty() {
            self.root()
        } else {
            resolve_path(parents, &self.root(), false)
        };
        let old = lookup(&target, last);
        match old.lazy_kind() {
            Some(LazyKind::Reference { .. }) => {
                put(&target, last, Value::Undefined);
                Some(old)
            }
            _ => None,
        }
    }

    /// Whether `value` has the declared type of the attribute at `path`.
    ///
    /// Paths deeper than the attribute itself are not validated, except
    /// under `body`. Undeclared attributes are never valid.
    pub fn is_value_valid_for_attribute(&self, path: &str, value: &Value) -> bool {
        let segments = split_path(path);
        let name = segments.first().copied().unwrap_or_default();
        if segments.len() > 1 && name != BODY {
            return true;
        }
        match self.defs.borrow().get(name) {
            Some(def) => def.attr_type.accepts(value),
            None => false,
        }
    }

    pub fn is_type_of_array(&self, path: &str) -> bool {
        let segments = split_path(path);
        let name = segments.first().copied().unwrap_or_default();
        if segments.len() > 1 && name != BODY {
            return false;
        }
        self.defs
            .borrow()
            .get(name)
            .map(|def| def.attr_type.is_list())
            .unwrap_or(false)
    }

    /// Derives every declared attribute from explicit config, its previous
    /// value, or the declared default.
    ///
    /// A computed config value for an attribute that already exists is
    /// layered as a decorator instead of replacing the stored value.
    pub fn initialize(&self, config: &BTreeMap<String, Value>, owner: ComponentId) {
        let defs = self.defs();
        for def in defs.iter() {
            let name = def.name.as_str();
            let has_attribute = self.has_attribute(name);
            let mut has_value = config.contains_key(name);
            let mut value = config.get(name).cloned().unwrap_or_default();

            if !has_value && !has_attribute {
                value = match &def.default {
                    Some(default) => self.factory.create(default, owner),
                    None => Value::Undefined,
                };
                has_value = !value.is_undefined();
            }

            let current = self.raw(name);
            if !((has_value && !current.same_identity(&value)) || !has_attribute) {
                continue;
            }

            if has_attribute && value.is_function_call() {
                trace!(attribute = name, "adding decorator");
                self.decorators
                    .borrow_mut()
                    .entry(name.to_string())
                    .or_insert_with(|| Rc::new(DecoratorChain::new()))
                    .decorators
                    .borrow_mut()
                    .push(value);
            } else if !same_reference(&value, &current) {
                self.values.borrow_mut().insert(name.to_string(), value);
            }
        }
    }

    /// Installs a new definition set (if given) and re-initialises
    pub fn merge(
        &self,
        config: &BTreeMap<String, Value>,
        defs: Option<Rc<AttributeDefSet>>,
        owner: ComponentId,
    ) {
        if let Some(defs) = defs {
            *self.defs.borrow_mut() = defs;
        }
        self.initialize(config, owner);
    }

    /// Tears the store down.
    ///
    /// Auto-destroyable components held in attributes (and in every body of
    /// the `body` map) are destroyed through `host`. Lazy values are returned
    /// keyed by attribute so the caller can release their references. A
    /// second call does nothing and returns an empty map.
    pub fn destroy(&self, host: &dyn ComponentHost) -> BTreeMap<String, Value> {
        let mut expressions = BTreeMap::new();
        if self.destroyed.replace(true) {
            return expressions;
        }

        let entries: Vec<(String, Value)> = self
            .values
            .borrow_mut()
            .iter_mut()
            .map(|(key, value)| (key.clone(), std::mem::take(value)))
            .collect();
        self.decorators.borrow_mut().clear();
        self.shadow_values.borrow_mut().clear();

        let mut owned = Vec::new();
        for (key, value) in entries {
            if key == BODY {
                if let Value::Map(bodies) = &value {
                    for body in bodies.borrow().values() {
                        owned.extend(body.items().iter().filter_map(Value::as_component));
                    }
                }
                continue;
            }

            let items = match &value {
                Value::List(_) => value.items(),
                other => vec![other.clone()],
            };
            for item in items {
                match item {
                    Value::Lazy(_) => {
                        expressions.insert(key.clone(), item);
                    }
                    Value::Component(id) => owned.push(id),
                    _ => {}
                }
            }
        }

        for id in owned {
            if host.auto_destroy(id) {
                host.destroy(id);
            }
        }
        debug!(expressions = expressions.len(), "attribute store destroyed");
        expressions
    }
}

fn qualify_body(key: &str, owner: ComponentId) -> Cow<'_, str> {
    if let Some(rest) = key.strip_prefix(BODY) {
        let at_word_boundary = rest
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if at_word_boundary {
            return Cow::Owned(format!("{}.{}{}", BODY, owner, rest));
        }
    }
    Cow::Borrowed(key)
}

fn same_reference(value: &Value, current: &Value) -> bool {
    match (value.as_lazy(), current.as_lazy()) {
        (Some(a), Some(b)) => match (a.reference_key(), b.reference_key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}
