use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use trellis_common::{ComponentId, LazyKind, LazyValue, Value, ValueProvider};

/// Shared, late-bound pointer to a value provider.
///
/// Global references are created before the global registry may exist, so
/// they share one slot that the registry fills in when it is built.
#[derive(Clone, Default)]
pub struct ProviderSlot(Rc<RefCell<Option<Weak<dyn ValueProvider>>>>);

impl ProviderSlot {
    pub fn new(provider: Weak<dyn ValueProvider>) -> Self {
        Self(Rc::new(RefCell::new(Some(provider))))
    }

    pub fn set(&self, provider: Weak<dyn ValueProvider>) {
        *self.0.borrow_mut() = Some(provider);
    }

    pub fn get(&self) -> Option<Rc<dyn ValueProvider>> {
        self.0.borrow().as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderSlot")
            .field(&self.get().is_some())
            .finish()
    }
}

/// Canonical handle for one normalized expression within one scope
pub struct PropertyReference {
    expression: String,
    scope: Option<ComponentId>,
    provider: ProviderSlot,
    last_result: RefCell<Value>,
}

impl PropertyReference {
    pub(crate) fn new(expression: String, scope: Option<ComponentId>, provider: ProviderSlot) -> Self {
        Self {
            expression,
            scope,
            provider,
            last_result: RefCell::new(Value::Undefined),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// `None` for global references
    pub fn scope(&self) -> Option<ComponentId> {
        self.scope
    }

    pub fn is_global(&self) -> bool {
        self.scope.is_none()
    }

    /// Result of the most recent evaluation
    pub fn last_result(&self) -> Value {
        self.last_result.borrow().clone()
    }

    pub fn key(&self) -> (Option<ComponentId>, &str) {
        (self.scope, &self.expression)
    }
}

impl fmt::Debug for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyReference")
            .field("expression", &self.expression)
            .field("scope", &self.scope)
            .finish()
    }
}

impl LazyValue for PropertyReference {
    fn evaluate(&self) -> Value {
        let value = self
            .provider
            .get()
            .map(|provider| provider.get_value(&self.expression))
            .unwrap_or_default();
        *self.last_result.borrow_mut() = value.clone();
        value
    }

    fn kind(&self) -> LazyKind {
        LazyKind::Reference {
            global: self.is_global(),
        }
    }

    fn assign(&self, value: Value) -> bool {
        match self.provider.get() {
            Some(provider) => provider.set_value(&self.expression, value),
            None => false,
        }
    }

    fn reference_key(&self) -> Option<(Option<ComponentId>, &str)> {
        Some(self.key())
    }
}
