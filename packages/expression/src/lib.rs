pub mod error;
pub mod factory;
pub mod graph;
pub mod locator;
pub mod normalize;
pub mod reference;
pub mod service;

#[cfg(test)]
mod tests_service;

pub use error::{ExpressionError, ExpressionResult};
pub use factory::{ExpressionValueFactory, ProviderLookup};
pub use graph::{Consumers, ReferenceKey};
pub use locator::{
    ComponentTree, Locator, LocatorDef, LocatorDefs, LocatorMetadata, PrimitiveCarry, WrapperKind,
    PRIMITIVE_SEPARATOR,
};
pub use normalize::{is_expression, is_global, is_unbound, normalize};
pub use reference::{PropertyReference, ProviderSlot};
pub use service::{ExpressionService, Notification, RecordingNotifier, ScopeNotifier};
