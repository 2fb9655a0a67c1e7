//! Collaborator traits shared across the runtime crates, plus in-memory
//! implementations used by tests and tooling.

use crate::ids::ComponentId;
use crate::path::{put, resolve_path, split_path};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeSet;

/// Something expressions can be resolved against (`v`, `$Label`, an item scope)
pub trait ValueProvider {
    /// Resolves a normalized expression relative to this provider
    fn get_value(&self, expression: &str) -> Value;

    /// Writes through an expression. Returns false when the provider is read-only.
    fn set_value(&self, _expression: &str, _value: Value) -> bool {
        false
    }
}

/// Provider over a plain value tree
#[derive(Debug, Clone, Default)]
pub struct MapProvider {
    root: Value,
}

impl MapProvider {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}

impl ValueProvider for MapProvider {
    fn get_value(&self, expression: &str) -> Value {
        resolve_path(&split_path(expression), &self.root, false)
    }

    fn set_value(&self, expression: &str, value: Value) -> bool {
        let segments = split_path(expression);
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };
        let target = resolve_path(parents, &self.root, false);
        put(&target, last, value)
    }
}

/// Lifecycle operations on live component instances
pub trait ComponentHost {
    fn is_valid(&self, id: ComponentId) -> bool;

    fn is_rendered(&self, id: ComponentId) -> bool;

    /// Whether the component is destroyed together with the value holding it
    fn auto_destroy(&self, id: ComponentId) -> bool;

    fn destroy(&self, id: ComponentId);
}

/// Framework-level error and warning reports
pub trait ErrorReporter {
    fn error(&self, message: &str);

    fn warning(&self, message: &str);
}

/// Forwards reports to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn error(&self, message: &str) {
        tracing::error!(target: "trellis", "{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "trellis", "{}", message);
    }
}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    errors: RefCell<Vec<String>>,
    warnings: RefCell<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn error(&self, message: &str) {
        tracing::error!(target: "trellis", "{}", message);
        self.errors.borrow_mut().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "trellis", "{}", message);
        self.warnings.borrow_mut().push(message.to_string());
    }
}

/// Mock component host for testing
#[derive(Debug, Default)]
pub struct MockHost {
    pub destroyed: RefCell<Vec<ComponentId>>,
    pub rendered: RefCell<BTreeSet<ComponentId>>,
    pub pinned: RefCell<BTreeSet<ComponentId>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_rendered(&self, id: ComponentId) {
        self.rendered.borrow_mut().insert(id);
    }

    /// Pinned components opt out of auto-destroy
    pub fn pin(&self, id: ComponentId) {
        self.pinned.borrow_mut().insert(id);
    }

    pub fn destroyed(&self) -> Vec<ComponentId> {
        self.destroyed.borrow().clone()
    }
}

impl ComponentHost for MockHost {
    fn is_valid(&self, id: ComponentId) -> bool {
        !self.destroyed.borrow().contains(&id)
    }

    fn is_rendered(&self, id: ComponentId) -> bool {
        self.rendered.borrow().contains(&id)
    }

    fn auto_destroy(&self, id: ComponentId) -> bool {
        !self.pinned.borrow().contains(&id)
    }

    fn destroy(&self, id: ComponentId) {
        self.destroyed.borrow_mut().push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_host_tracks_lifecycle() {
        let host = MockHost::new();
        let id = ComponentId(7);
        host.pin(ComponentId(8));

        assert!(host.is_valid(id));
        assert!(host.auto_destroy(id));
        assert!(!host.auto_destroy(ComponentId(8)));

        host.destroy(id);
        assert!(!host.is_valid(id));
        assert_eq!(host.destroyed(), vec![id]);
    }

    #[test]
    fn test_map_provider() {
        let provider = MapProvider::new(Value::map([("user", Value::map([("name", Value::from("ada"))]))]));

        assert_eq!(provider.get_value("user.name"), Value::from("ada"));
        assert!(provider.set_value("user.age", Value::from(36)));
        assert_eq!(provider.get_value("user.age"), Value::from(36));
        assert!(!provider.set_value("missing.age", Value::from(1)));
    }

    #[test]
    fn test_recording_reporter() {
        let reporter = RecordingReporter::new();
        reporter.warning("careful");
        reporter.error("broken");

        assert_eq!(reporter.warnings(), vec!["careful".to_string()]);
        assert_eq!(reporter.errors(), vec!["broken".to_string()]);
    }
}
