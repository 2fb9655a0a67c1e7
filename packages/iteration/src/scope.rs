use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use trellis_common::{put, resolve_path, split_path, Value, ValueProvider};

/// Told when a scope variable changes under components already built on it
pub trait ScopeListener {
    /// `variable` is the item or index variable name
    fn variable_changed(&self, variable: &str);
}

/// Value provider for the components built from one item.
///
/// `<var>` and `<indexVar>` resolve locally. Every other expression passes
/// through to the provider of the template.
pub struct ItemScope {
    item_var: String,
    index_var: String,
    item: RefCell<Value>,
    index: Cell<usize>,
    parent: Option<Weak<dyn ValueProvider>>,
    listener: RefCell<Option<Rc<dyn ScopeListener>>>,
}

impl std::fmt::Debug for ItemScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemScope")
            .field("item_var", &self.item_var)
            .field("index_var", &self.index_var)
            .field("index", &self.index.get())
            .finish()
    }
}

impl ItemScope {
    pub fn new(
        item_var: impl Into<String>,
        index_var: impl Into<String>,
        item: Value,
        index: usize,
        parent: Option<Weak<dyn ValueProvider>>,
    ) -> Self {
        Self {
            item_var: item_var.into(),
            index_var: index_var.into(),
            item: RefCell::new(item),
            index: Cell::new(index),
            parent,
            listener: RefCell::new(None),
        }
    }

    pub fn item(&self) -> Value {
        self.item.borrow().clone()
    }

    pub fn index(&self) -> usize {
        self.index.get()
    }

    pub fn set_listener(&self, listener: Rc<dyn ScopeListener>) {
        *self.listener.borrow_mut() = Some(listener);
    }

    /// Moves the scope to a new position, keeping the components built on it.
    /// The listener hears about each variable whose value changed.
    pub fn relocate(&self, item: Value, index: usize) {
        let item_changed = !self.item.borrow().same_identity(&item);
        let index_changed = self.index.get() != index;
        *self.item.borrow_mut() = item;
        self.index.set(index);

        if item_changed {
            self.changed(&self.item_var);
        }
        if index_changed {
            self.changed(&self.index_var);
        }
    }

    fn changed(&self, variable: &str) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener.variable_changed(variable);
        }
    }

    fn parent(&self) -> Option<Rc<dyn ValueProvider>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }
}

impl ValueProvider for ItemScope {
    fn get_value(&self, expression: &str) -> Value {
        let segments = split_path(expression);
        match segments.split_first() {
            Some((head, rest)) if *head == self.item_var => {
                resolve_path(rest, &self.item.borrow(), false)
            }
            Some((head, rest)) if *head == self.index_var && rest.is_empty() => {
                Value::from(self.index.get())
            }
            _ => self
                .parent()
                .map(|parent| parent.get_value(expression))
                .unwrap_or_default(),
        }
    }

    fn set_value(&self, expression: &str, value: Value) -> bool {
        let segments = split_path(expression);
        match segments.split_first() {
            Some((head, [])) if *head == self.item_var => {
                *self.item.borrow_mut() = value;
                self.changed(&self.item_var);
                true
            }
            Some((head, rest)) if *head == self.item_var => {
                let Some((last, parents)) = rest.split_last() else {
                    return false;
                };
                let target = resolve_path(parents, &self.item.borrow(), false);
                let written = put(&target, last, value);
                if written {
                    self.changed(&self.item_var);
                }
                written
            }
            Some((head, [])) if *head == self.index_var => match value.as_number() {
                Some(n) if n >= 0.0 => {
                    self.index.set(n as usize);
                    self.changed(&self.index_var);
                    true
                }
                _ => false,
            },
            _ => self
                .parent()
                .map(|parent| parent.set_value(expression, value))
                .unwrap_or(false),
        }
    }
}
