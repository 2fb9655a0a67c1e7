//! # Locators
//!
//! Stable, human-readable addresses for components, used by tooling to find
//! a component regardless of generated ids.
//!
//! A locator names a `target` (the root component's local id or alias) within
//! a `scope` (its parent's local id or alias), plus optional context values
//! resolved from declared expressions. Declarations marked primitive are
//! re-rooted one real container up, and the skipped target is carried along
//! as a `__`-separated suffix.

use crate::normalize::{is_expression, normalize};
use crate::service::ExpressionService;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::trace;
use trellis_common::{ComponentId, Value};

pub const PRIMITIVE_SEPARATOR: &str = "__";

/// Structural components that do not count as containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WrapperKind {
    Conditional,
    Iteration,
    Virtual,
    AbstractList,
    DataGrid,
}

/// Locator declaration for one local id (or `*`) inside a component definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorDef {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub is_primitive: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Context key -> literal string or `{!expr}`
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

pub type LocatorDefs = BTreeMap<String, LocatorDef>;

/// View of the component tree needed for locator resolution
pub trait ComponentTree {
    fn owner(&self, id: ComponentId) -> Option<ComponentId>;

    fn wrapper_kind(&self, id: ComponentId) -> Option<WrapperKind>;

    fn local_id(&self, id: ComponentId) -> Option<String>;

    fn super_of(&self, id: ComponentId) -> Option<ComponentId>;

    /// Most derived component of the inheritance chain `id` belongs to
    fn concrete(&self, id: ComponentId) -> ComponentId;

    fn locator_defs(&self, id: ComponentId) -> Option<Rc<LocatorDefs>>;

    fn def_name(&self, id: ComponentId) -> String;

    fn is_valid(&self, id: ComponentId) -> bool;

    /// Evaluates a normalized expression with `id` as the value provider
    fn evaluate_in(&self, id: ComponentId, expression: &str) -> Value;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorMetadata {
    pub root: String,
    pub root_id: String,
    pub parent: String,
    pub parent_id: String,
    pub grandparent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locator {
    pub target: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LocatorMetadata>,
}

/// Target and context of a primitive declaration, carried one level up
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimitiveCarry {
    pub target: String,
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ExpressionService {
    /// Nearest owner of `component` that is not a transparent wrapper.
    ///
    /// Stops if the owner chain loops back on itself.
    pub fn get_container(&self, tree: &dyn ComponentTree, component: ComponentId) -> Option<ComponentId> {
        let mut owner = tree.owner(component)?;
        let mut visited = BTreeSet::new();
        while tree.wrapper_kind(owner).is_some() {
            if !visited.insert(owner) {
                break;
            }
            match tree.owner(owner) {
                Some(next) => owner = next,
                None => break,
            }
        }
        Some(owner)
    }

    /// Builds the locator of `root` as seen from `parent`
    pub fn resolve_locator(
        &self,
        tree: &dyn ComponentTree,
        parent: ComponentId,
        root: ComponentId,
        include_metadata: bool,
        primitive: Option<PrimitiveCarry>,
    ) -> Option<Locator> {
        let root_id = tree.local_id(root)?;
        let parent_id = tree.local_id(parent);
        let root_def = find_locator_def(tree, parent, &root_id);

        if primitive.is_none() {
            if let Some(def) = root_def.as_ref().filter(|def| def.is_primitive) {
                let carry = PrimitiveCarry {
                    target: def.alias.clone().unwrap_or_else(|| root_id.clone()),
                    context: self.resolve_locator_context(tree, parent, def),
                };
                trace!(primitive_target = %carry.target, "re-rooting primitive locator");
                let container = tree.concrete(self.get_container(tree, parent)?);
                return self.resolve_locator(tree, container, parent, include_metadata, Some(carry));
            }
        }

        let grandparent = tree.concrete(self.get_container(tree, parent)?);
        let parent_id = parent_id?;
        let parent_def = find_locator_def(tree, grandparent, &parent_id)?;
        let root_def = root_def?;

        let mut context = self.resolve_locator_context(tree, grandparent, &parent_def);
        context.extend(self.resolve_locator_context(tree, parent, &root_def));
        if let Some(carry) = &primitive {
            context.extend(carry.context.clone());
        }

        let mut target = root_def.alias.clone().unwrap_or_else(|| root_id.clone());
        if let Some(carry) = &primitive {
            target = format!("{}{}{}", target, PRIMITIVE_SEPARATOR, carry.target);
        }

        let metadata = include_metadata.then(|| LocatorMetadata {
            root: tree.def_name(root),
            root_id: root_id.clone(),
            parent: tree.def_name(parent),
            parent_id: parent_id.clone(),
            grandparent: tree.def_name(grandparent),
            target_description: root_def.description.clone(),
            scope_description: root_def
                .description
                .as_ref()
                .and(parent_def.description.clone()),
        });

        Some(Locator {
            target,
            scope: parent_def.alias.clone().unwrap_or(parent_id),
            context: (!context.is_empty()).then_some(context),
            metadata,
        })
    }

    fn resolve_locator_context(
        &self,
        tree: &dyn ComponentTree,
        component: ComponentId,
        def: &LocatorDef,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut context = BTreeMap::new();
        if !tree.is_valid(component) {
            return context;
        }
        for (key, raw) in &def.context {
            let value = if is_expression(raw) {
                tree.evaluate_in(component, &normalize(raw)).to_json()
            } else {
                serde_json::Value::String(raw.clone())
            };
            context.insert(key.clone(), value);
        }
        context
    }
}

/// Declaration for `target_id` (or the `*` wildcard) in `component` or the
/// nearest super component that has one
fn find_locator_def(tree: &dyn ComponentTree, component: ComponentId, target_id: &str) -> Option<LocatorDef> {
    let mut current = Some(component);
    while let Some(id) = current {
        if let Some(defs) = tree.locator_defs(id) {
            if let Some(def) = defs.get(target_id).or_else(|| defs.get("*")) {
                return Some(def.clone());
            }
        }
        current = tree.super_of(id);
    }
    None
}
