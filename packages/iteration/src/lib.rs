pub mod error;
pub mod factory;
pub mod range;
pub mod reconciler;
pub mod scope;

#[cfg(test)]
mod tests_reconciler;

pub use error::{BuildError, BuildResult};
pub use factory::{ComponentFactory, MockFactory};
pub use range::{get_end, get_start};
pub use reconciler::{
    iteration_defs, BodyReport, ItemBinding, Iteration, IterationListener, IterationOperation,
    END, FORCE_SERVER, INDEX_VAR, ITEMS, ITERATION_DESCRIPTOR, LOADED, START, TEMPLATE, VAR,
};
pub use scope::{ItemScope, ScopeListener};
