//! # Expression Service
//!
//! Normalizes and resolves path expressions and owns the reference graph.
//!
//! ## Purpose
//!
//! - One canonical [`PropertyReference`] per `(scope, expression)`
//! - Consumer registration on references, with fan-out when a global or a
//!   scoped value changes
//! - Teardown of every reference owned by a destroyed scope
//!
//! Consumers are told about changes through a [`ScopeNotifier`]. The graph is
//! never borrowed while the notifier or a provider runs, since both may call
//! back into the service.

use crate::error::{ExpressionError, ExpressionResult};
use crate::graph::{Consumers, ReferenceGraph, ReferenceKey};
use crate::normalize::{is_global, normalize};
use crate::reference::{PropertyReference, ProviderSlot};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, instrument, trace};
use trellis_common::{find_case_insensitive, lookup, ComponentId, LazyValue, Value, ValueProvider};

/// Receives invalidations for consumer scopes
pub trait ScopeNotifier {
    fn is_valid(&self, _scope: ComponentId) -> bool {
        true
    }

    fn mark_dirty(&self, scope: ComponentId, expression: &str);

    fn fire_change(&self, scope: ComponentId, expression: &str, old: &Value, new: &Value);

    /// The reference behind `expression` in `scope` was released
    fn clear_reference(&self, scope: ComponentId, expression: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Dirty {
        scope: ComponentId,
        expression: String,
    },
    Change {
        scope: ComponentId,
        expression: String,
        old: Value,
        new: Value,
    },
    Cleared {
        scope: ComponentId,
        expression: String,
    },
}

/// Notifier that records everything it is told, for tests and tooling
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: RefCell<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.borrow().clone()
    }

    pub fn dirty_count(&self, scope: ComponentId) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, Notification::Dirty { scope: s, .. } if *s == scope))
            .count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl ScopeNotifier for RecordingNotifier {
    fn mark_dirty(&self, scope: ComponentId, expression: &str) {
        self.events.borrow_mut().push(Notification::Dirty {
            scope,
            expression: expression.to_string(),
        });
    }

    fn fire_change(&self, scope: ComponentId, expression: &str, old: &Value, new: &Value) {
        self.events.borrow_mut().push(Notification::Change {
            scope,
            expression: expression.to_string(),
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn clear_reference(&self, scope: ComponentId, expression: &str) {
        self.events.borrow_mut().push(Notification::Cleared {
            scope,
            expression: expression.to_string(),
        });
    }
}

pub struct ExpressionService {
    graph: RefCell<ReferenceGraph>,
    diagnostics: bool,
    globals: ProviderSlot,
    notifier: RefCell<Option<Weak<dyn ScopeNotifier>>>,
}

impl Default for ExpressionService {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ExpressionService {
    /// `diagnostics` turns on case-sensitivity checks in [`resolve`](Self::resolve)
    pub fn new(diagnostics: bool) -> Self {
        Self {
            graph: RefCell::new(ReferenceGraph::default()),
            diagnostics,
            globals: ProviderSlot::default(),
            notifier: RefCell::new(None),
        }
    }

    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    /// Provider that global (`$`) references evaluate against
    pub fn set_global_provider(&self, provider: Weak<dyn ValueProvider>) {
        self.globals.set(provider);
    }

    pub fn global_provider(&self) -> Option<Rc<dyn ValueProvider>> {
        self.globals.get()
    }

    pub fn set_notifier(&self, notifier: Weak<dyn ScopeNotifier>) {
        *self.notifier.borrow_mut() = Some(notifier);
    }

    fn notifier(&self) -> Option<Rc<dyn ScopeNotifier>> {
        self.notifier.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn normalize(&self, expression: &str) -> String {
        normalize(expression)
    }

    /// Walks `segments` from `container`.
    ///
    /// Lazy values are evaluated at each step unless `raw` is set. The walk
    /// stops at the first `Undefined` or `Null`. With diagnostics on, a
    /// missing map key that exists with different casing is an error.
    pub fn resolve<S: AsRef<str>>(
        &self,
        segments: &[S],
        container: &Value,
        raw: bool,
    ) -> ExpressionResult<Value> {
        let mut target = container.clone();
        for segment in segments {
            if target.is_undefined_or_null() {
                break;
            }
            let segment: &str = segment.as_ref();
            if self.diagnostics {
                self.check_case(segments, &target, segment)?;
            }
            target = lookup(&target, segment);
            if !raw {
                target = target.evaluated();
            }
        }
        Ok(target)
    }

    /// [`resolve`](Self::resolve) on a dotted expression
    pub fn resolve_expression(
        &self,
        expression: &str,
        container: &Value,
        raw: bool,
    ) -> ExpressionResult<Value> {
        let segments: Vec<&str> = expression.split('.').collect();
        self.resolve(&segments, container, raw)
    }

    fn check_case<S: AsRef<str>>(
        &self,
        segments: &[S],
        target: &Value,
        segment: &str,
    ) -> ExpressionResult<()> {
        let Value::Map(map) = target else {
            return Ok(());
        };
        if map.borrow().contains_key(segment) {
            return Ok(());
        }
        match find_case_insensitive(target, segment) {
            Some(suggestion) => Err(ExpressionError::CaseSensitivity {
                expression: segments
                    .iter()
                    .map(|s| s.as_ref())
                    .collect::<Vec<&str>>()
                    .join("."),
                segment: segment.to_string(),
                suggestion,
            }),
            None => Ok(()),
        }
    }

    /// Canonical reference for `expression`. `$`-prefixed expressions are
    /// global and ignore `scope`; everything else is owned by `scope` and
    /// evaluated against `provider`.
    pub fn get_reference(
        &self,
        expression: &str,
        scope: ComponentId,
        provider: Weak<dyn ValueProvider>,
    ) -> Rc<PropertyReference> {
        let expression = normalize(expression);
        if is_global(&expression) {
            return self.get_global_reference(&expression);
        }
        let key = ReferenceKey::new(Some(scope), expression);
        self.graph.borrow_mut().get_or_insert(&key, || {
            trace!(scope = %scope, expression = %key.expression, "creating reference");
            PropertyReference::new(key.expression.clone(), Some(scope), ProviderSlot::new(provider))
        })
    }

    pub fn get_global_reference(&self, expression: &str) -> Rc<PropertyReference> {
        let key = ReferenceKey::new(None, normalize(expression));
        let globals = self.globals.clone();
        self.graph.borrow_mut().get_or_insert(&key, || {
            trace!(expression = %key.expression, "creating global reference");
            PropertyReference::new(key.expression.clone(), None, globals)
        })
    }

    pub fn add_expression_listener(
        &self,
        reference: &PropertyReference,
        expression: &str,
        consumer: ComponentId,
    ) -> ExpressionResult<()> {
        let key = ReferenceKey::new(reference.scope(), reference.expression());
        let expression = normalize(expression);
        if self
            .graph
            .borrow_mut()
            .add_consumer(&key, consumer, &expression)
        {
            Ok(())
        } else {
            Err(unknown(&key))
        }
    }

    /// Returns whether a registration was removed
    pub fn remove_expression_listener(
        &self,
        reference: &PropertyReference,
        expression: &str,
        consumer: ComponentId,
    ) -> ExpressionResult<bool> {
        let key = ReferenceKey::new(reference.scope(), reference.expression());
        let expression = normalize(expression);
        let mut graph = self.graph.borrow_mut();
        if graph.entry(&key).is_none() {
            return Err(unknown(&key));
        }
        Ok(graph.remove_consumer(&key, consumer, &expression))
    }

    pub fn consumers_of(&self, reference: &PropertyReference) -> Consumers {
        let key = ReferenceKey::new(reference.scope(), reference.expression());
        self.graph
            .borrow()
            .entry(&key)
            .map(|entry| entry.consumers.clone())
            .unwrap_or_default()
    }

    /// Re-evaluates the global reference for `expression` and notifies its
    /// consumers, unless the reference already holds `new`.
    ///
    /// Returns the number of consumer expressions notified.
    pub fn update_global_reference(&self, expression: &str, old: &Value, new: &Value) -> usize {
        let key = ReferenceKey::new(None, normalize(expression));
        let (reference, consumers) = {
            let graph = self.graph.borrow();
            let Some(entry) = graph.entry(&key) else {
                return 0;
            };
            if entry.reference.last_result().same_identity(new) {
                return 0;
            }
            (entry.reference.clone(), entry.consumers.clone())
        };

        let previous = reference.last_result();
        reference.evaluate();
        let old = if previous.is_undefined() {
            old.clone()
        } else {
            previous
        };
        debug!(expression = %key.expression, consumers = consumers.len(), "global reference changed");
        self.notify(&consumers, &old, new)
    }

    /// Fans a merge of `new_values` into provider `provider_key` out to every
    /// path it touches: the provider itself and each nested key at any depth.
    #[instrument(skip(self, new_values))]
    pub fn update_global_references(&self, provider_key: &str, new_values: &Value) -> usize {
        let current = self
            .global_provider()
            .map(|provider| provider.get_value(provider_key))
            .unwrap_or_default();
        let mut notified = self.update_global_reference(provider_key, &current, new_values);
        notified += self.update_nested(provider_key, &current, new_values);
        notified
    }

    fn update_nested(&self, expression: &str, current: &Value, new_values: &Value) -> usize {
        let Value::Map(entries) = new_values else {
            return 0;
        };
        let entries: Vec<(String, Value)> = entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut notified = 0;
        for (name, value) in entries {
            let target = format!("{}.{}", expression, name);
            let old = lookup(current, &name);
            notified += self.update_global_reference(&target, &old, &value);
            if value.is_map() {
                notified += self.update_nested(&target, &old, &value);
            }
        }
        notified
    }

    /// Local invalidation: re-evaluates the reference `expression` owned by
    /// `scope` and notifies its consumers.
    pub fn update_reference(&self, expression: &str, scope: ComponentId) -> usize {
        let key = ReferenceKey::new(Some(scope), normalize(expression));
        let (reference, consumers) = {
            let graph = self.graph.borrow();
            let Some(entry) = graph.entry(&key) else {
                return 0;
            };
            (entry.reference.clone(), entry.consumers.clone())
        };
        let old = reference.last_result();
        let new = reference.evaluate();
        self.notify(&consumers, &old, &new)
    }

    /// [`update_reference`](Self::update_reference) for every reference owned
    /// by `scope` on `root` or below it (`row`, `row.label`, but not `rows`).
    pub fn update_references_under(&self, root: &str, scope: ComponentId) -> usize {
        let root = normalize(root);
        let expressions = self.graph.borrow().scoped_expressions(scope);
        expressions
            .iter()
            .filter(|expression| {
                expression
                    .strip_prefix(root.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
            })
            .map(|expression| self.update_reference(expression, scope))
            .sum()
    }

    /// Releases every reference owned by `scope` and every listener `scope`
    /// registered. Consumers of the released references are told to clear
    /// their slots.
    #[instrument(skip(self))]
    pub fn clear_references(&self, scope: ComponentId) {
        let orphaned = self.graph.borrow_mut().release_scope(scope);
        if orphaned.is_empty() {
            return;
        }
        let Some(notifier) = self.notifier() else {
            return;
        };
        for (consumer, expression) in orphaned {
            if notifier.is_valid(consumer) {
                notifier.clear_reference(consumer, &expression);
            }
        }
    }

    fn notify(&self, consumers: &Consumers, old: &Value, new: &Value) -> usize {
        let Some(notifier) = self.notifier() else {
            return 0;
        };
        let mut notified = 0;
        for (scope, expressions) in consumers {
            if !notifier.is_valid(*scope) {
                continue;
            }
            for expression in expressions {
                notifier.mark_dirty(*scope, expression);
                notifier.fire_change(*scope, expression, old, new);
                notified += 1;
            }
        }
        notified
    }

    pub fn scope_count(&self) -> usize {
        self.graph.borrow().scope_count()
    }

    pub fn global_reference_count(&self) -> usize {
        self.graph.borrow().global_count()
    }

    pub fn listening_to(&self, consumer: ComponentId) -> usize {
        self.graph.borrow().listening_to(consumer)
    }
}

fn unknown(key: &ReferenceKey) -> ExpressionError {
    ExpressionError::UnknownReference {
        expression: key.expression.clone(),
        scope: key
            .scope
            .map(|s| s.to_string())
            .unwrap_or_else(|| "global".to_string()),
    }
}
