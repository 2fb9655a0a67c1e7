pub mod access;
pub mod def;
pub mod error;
pub mod factory;
pub mod store;

#[cfg(test)]
mod tests_store;

pub use access::{AccessControl, AccessPolicy, AllowAll, VisibilityRules};
pub use def::{AttributeDef, AttributeDefSet, AttributeType, Visibility};
pub use error::{AttributeError, AttributeResult};
pub use factory::{LiteralValueFactory, ValueFactory};
pub use store::{AttributeStore, ChainState, SetOutcome, BODY};
