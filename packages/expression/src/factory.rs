use crate::normalize::{is_expression, is_global, is_unbound, normalize};
use crate::service::ExpressionService;
use std::rc::{Rc, Weak};
use trellis_attributes::ValueFactory;
use trellis_common::{ComponentId, LazyValue, Value, ValueProvider};

/// Finds the value provider that expressions owned by a component resolve against
pub trait ProviderLookup {
    fn provider_for(&self, owner: ComponentId) -> Option<Weak<dyn ValueProvider>>;

    /// Scope that owns references created for `owner`
    fn scope_for(&self, owner: ComponentId) -> ComponentId {
        owner
    }
}

/// Attribute value factory that turns `{!expr}` strings into property
/// references and `{#expr}` strings into their current value
pub struct ExpressionValueFactory {
    service: Rc<ExpressionService>,
    providers: Weak<dyn ProviderLookup>,
}

impl ExpressionValueFactory {
    pub fn new(service: Rc<ExpressionService>, providers: Weak<dyn ProviderLookup>) -> Self {
        Self { service, providers }
    }

    /// Reference value for `raw`, or `Undefined` when the owner has no provider
    pub fn create_expression(&self, raw: &str, owner: ComponentId) -> Value {
        let expression = normalize(raw);
        let reference = if is_global(&expression) {
            self.service.get_global_reference(&expression)
        } else {
            let Some(lookup) = self.providers.upgrade() else {
                return Value::Undefined;
            };
            match lookup.provider_for(owner) {
                Some(provider) => {
                    self.service
                        .get_reference(&expression, lookup.scope_for(owner), provider)
                }
                None => return Value::Undefined,
            }
        };

        if is_unbound(raw) {
            reference.evaluate()
        } else {
            Value::Lazy(reference)
        }
    }
}

impl ValueFactory for ExpressionValueFactory {
    fn create(&self, config: &serde_json::Value, owner: ComponentId) -> Value {
        match config {
            serde_json::Value::String(raw) if is_expression(raw) => self.create_expression(raw, owner),
            other => Value::from_json(other),
        }
    }
}
