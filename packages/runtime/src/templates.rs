//! Builds iteration items from template entries.
//!
//! An entry is either a component whose configuration is copied, or a map:
//!
//! ```json
//! { "descriptor": "ui:row", "localId": "row", "attributes": { "label": "{!item.name}" } }
//! ```
//!
//! Item components are owned by the iteration and resolve expressions
//! against their item scope. When a reused item moves, their references on
//! the item and index variables are re-evaluated. Asynchronous builds load
//! missing definitions before creating anything.

use crate::components::{ComponentConfig, ComponentRegistry};
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use tracing::debug;
use trellis_common::{ComponentId, DefDescriptor, Value, ValueProvider};
use trellis_iteration::{BuildError, BuildResult, ComponentFactory, ItemScope, ScopeListener};
use trellis_loader::{DefinitionCache, DefinitionLoader, LoadError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateEntry {
    descriptor: String,
    #[serde(default)]
    local_id: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
}

fn parse_descriptor(raw: &str) -> BuildResult<DefDescriptor> {
    DefDescriptor::parse(raw).map_err(|e| BuildError::Template(e.to_string()))
}

/// Re-evaluates references of one item's components on a scope variable
struct ItemNotifier {
    registry: Weak<ComponentRegistry>,
    components: Vec<ComponentId>,
}

impl ScopeListener for ItemNotifier {
    fn variable_changed(&self, variable: &str) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        for id in &self.components {
            registry.scope_variable_changed(*id, variable);
        }
    }
}

#[derive(Clone)]
pub struct TemplateFactory {
    registry: Weak<ComponentRegistry>,
    loader: Rc<DefinitionLoader>,
    definitions: Rc<dyn DefinitionCache>,
    iteration: ComponentId,
}

impl TemplateFactory {
    pub fn new(
        registry: Weak<ComponentRegistry>,
        loader: Rc<DefinitionLoader>,
        definitions: Rc<dyn DefinitionCache>,
        iteration: ComponentId,
    ) -> Self {
        Self {
            registry,
            loader,
            definitions,
            iteration,
        }
    }

    fn registry(&self) -> BuildResult<Rc<ComponentRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| BuildError::Failed("component registry is gone".to_string()))
    }

    fn entry_config(&self, registry: &ComponentRegistry, entry: &Value) -> BuildResult<ComponentConfig> {
        if let Some(template) = entry.as_component() {
            return registry.template_config(template).ok_or_else(|| {
                BuildError::Template(format!("template component {} no longer exists", template))
            });
        }
        let entry: TemplateEntry =
            serde_json::from_value(entry.to_json()).map_err(|e| BuildError::Template(e.to_string()))?;
        let mut config = ComponentConfig::new(parse_descriptor(&entry.descriptor)?);
        config.local_id = entry.local_id;
        config.attributes = entry.attributes;
        Ok(config)
    }

    /// Descriptors named by `template` that are not defined yet
    fn missing_definitions(&self, template: &[Value]) -> BuildResult<BTreeSet<DefDescriptor>> {
        let mut missing = BTreeSet::new();
        for entry in template.iter().filter(|entry| entry.as_component().is_none()) {
            let raw = entry
                .as_map()
                .and_then(|map| map.borrow().get("descriptor").cloned())
                .unwrap_or_default();
            let descriptor = parse_descriptor(raw.as_str().unwrap_or_default())?;
            if !self.definitions.has_definition(&descriptor) {
                missing.insert(descriptor);
            }
        }
        Ok(missing)
    }

    fn build(&self, template: &[Value], scope: Rc<ItemScope>) -> BuildResult<Vec<ComponentId>> {
        let registry = self.registry()?;
        let provider: Rc<dyn ValueProvider> = scope.clone();

        let mut created = Vec::new();
        for entry in template {
            let result = self.entry_config(&registry, entry).and_then(|config| {
                registry
                    .create_component(config.owner(self.iteration).value_provider(Rc::downgrade(&provider)))
                    .map_err(|e| BuildError::Failed(e.to_string()))
            });
            match result {
                Ok(id) => created.push(id),
                Err(e) => {
                    for id in created {
                        registry.destroy_component(id);
                    }
                    return Err(e);
                }
            }
        }
        scope.set_listener(Rc::new(ItemNotifier {
            registry: self.registry.clone(),
            components: created.clone(),
        }));
        Ok(created)
    }
}

impl ComponentFactory for TemplateFactory {
    fn create_local(&self, template: &[Value], scope: Rc<ItemScope>) -> BuildResult<Vec<ComponentId>> {
        self.build(template, scope)
    }

    fn create_async(
        &self,
        template: &[Value],
        scope: Rc<ItemScope>,
    ) -> LocalBoxFuture<'static, BuildResult<Vec<ComponentId>>> {
        let factory = self.clone();
        let template = template.to_vec();
        async move {
            let missing = factory.missing_definitions(&template)?;
            if !missing.is_empty() {
                debug!(missing = missing.len(), "loading template definitions");
                let (sender, receiver) = oneshot::channel();
                factory
                    .loader
                    .load_component_defs(missing.into_iter().map(|d| (d, None)), move |result| {
                        let _ = sender.send(result);
                    });
                receiver
                    .await
                    .unwrap_or(Err(LoadError::Abandoned))
                    .map_err(|e| BuildError::Failed(e.to_string()))?;
            }
            factory.build(&template, scope)
        }
        .boxed_local()
    }
}
