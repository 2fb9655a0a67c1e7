//! # Reference graph
//!
//! Arena of canonical references keyed by `(scope, expression)` and the
//! consumers listening to each of them.
//!
//! ## Layout
//!
//! - `globals`: expression -> entry, for `$`-prefixed expressions
//! - `scoped`: scope -> expression -> entry, so dropping every reference of a
//!   destroyed scope is one map removal
//! - `listening`: consumer -> references it listens to, so a destroyed
//!   consumer can be unregistered without walking the whole graph
//!
//! Entries only ever point at each other through ids and expression strings.

use crate::reference::PropertyReference;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use trellis_common::ComponentId;

/// Consumer scope -> expressions in that scope that depend on a reference
pub type Consumers = BTreeMap<ComponentId, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    pub scope: Option<ComponentId>,
    pub expression: String,
}

impl ReferenceKey {
    pub fn new(scope: Option<ComponentId>, expression: impl Into<String>) -> Self {
        Self {
            scope,
            expression: expression.into(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub reference: Rc<PropertyReference>,
    pub consumers: Consumers,
}

#[derive(Debug, Default)]
pub(crate) struct ReferenceGraph {
    globals: HashMap<String, Entry>,
    scoped: HashMap<ComponentId, HashMap<String, Entry>>,
    listening: HashMap<ComponentId, BTreeSet<ReferenceKey>>,
}

impl ReferenceGraph {
    pub fn entry(&self, key: &ReferenceKey) -> Option<&Entry> {
        match key.scope {
            None => self.globals.get(&key.expression),
            Some(scope) => self.scoped.get(&scope)?.get(&key.expression),
        }
    }

    fn entry_mut(&mut self, key: &ReferenceKey) -> Option<&mut Entry> {
        match key.scope {
            None => self.globals.get_mut(&key.expression),
            Some(scope) => self.scoped.get_mut(&scope)?.get_mut(&key.expression),
        }
    }

    /// Returns the canonical reference for `key`, creating it with `create`
    pub fn get_or_insert(
        &mut self,
        key: &ReferenceKey,
        create: impl FnOnce() -> PropertyReference,
    ) -> Rc<PropertyReference> {
        let map = match key.scope {
            None => &mut self.globals,
            Some(scope) => self.scoped.entry(scope).or_default(),
        };
        map.entry(key.expression.clone())
            .or_insert_with(|| Entry {
                reference: Rc::new(create()),
                consumers: Consumers::new(),
            })
            .reference
            .clone()
    }

    /// Returns false when `key` is not a known reference
    pub fn add_consumer(&mut self, key: &ReferenceKey, consumer: ComponentId, expression: &str) -> bool {
        let Some(entry) = self.entry_mut(key) else {
            return false;
        };
        entry
            .consumers
            .entry(consumer)
            .or_default()
            .insert(expression.to_string());
        self.listening
            .entry(consumer)
            .or_default()
            .insert(key.clone());
        true
    }

    pub fn remove_consumer(&mut self, key: &ReferenceKey, consumer: ComponentId, expression: &str) -> bool {
        let Some(entry) = self.entry_mut(key) else {
            return false;
        };
        let Some(expressions) = entry.consumers.get_mut(&consumer) else {
            return false;
        };
        let removed = expressions.remove(expression);
        if expressions.is_empty() {
            entry.consumers.remove(&consumer);
            if let Some(keys) = self.listening.get_mut(&consumer) {
                keys.remove(key);
                if keys.is_empty() {
                    self.listening.remove(&consumer);
                }
            }
        }
        removed
    }

    /// Removes every reference owned by `scope` and every registration made
    /// by `scope` as a consumer. Returns the consumers of the removed
    /// references, which must clear their slots.
    pub fn release_scope(&mut self, scope: ComponentId) -> Vec<(ComponentId, String)> {
        if let Some(keys) = self.listening.remove(&scope) {
            for key in keys {
                if let Some(entry) = self.entry_mut(&key) {
                    entry.consumers.remove(&scope);
                }
            }
        }

        let mut orphaned = Vec::new();
        if let Some(references) = self.scoped.remove(&scope) {
            for entry in references.into_values() {
                let key = ReferenceKey::new(Some(scope), entry.reference.expression());
                for (consumer, expressions) in entry.consumers {
                    if let Some(keys) = self.listening.get_mut(&consumer) {
                        keys.remove(&key);
                        if keys.is_empty() {
                            self.listening.remove(&consumer);
                        }
                    }
                    orphaned.extend(expressions.into_iter().map(|e| (consumer, e)));
                }
            }
        }
        orphaned
    }

    /// Expressions of the references owned by `scope`
    pub fn scoped_expressions(&self, scope: ComponentId) -> Vec<String> {
        self.scoped
            .get(&scope)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn scope_count(&self) -> usize {
        self.scoped.len()
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    pub fn listening_to(&self, consumer: ComponentId) -> usize {
        self.listening.get(&consumer).map_or(0, BTreeSet::len)
    }
}
