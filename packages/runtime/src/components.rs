//! # Component Registry
//!
//! ## Purpose
//!
//! Owns live component instances: their attribute stores, their place in the
//! owner and inheritance trees, and the dirty/change bookkeeping that
//! expression notifications land in.
//!
//! ## Value providers
//!
//! Every component exposes its attributes as `v.<path>`. Expressions
//! configured on a component resolve against its owner's provider, so
//! `{!v.label}` on a child binds to the owner's `label` and the reference is
//! owned by the owner. Root components resolve against themselves. A
//! component created with its own value provider (an iteration item scope)
//! resolves against that provider and owns the references itself.
//!
//! ## Invalidation
//!
//! Assigning an attribute re-evaluates the references owned by the
//! component on that attribute path and notifies their consumers. Writes to
//! a slot holding a reference are delegated to the reference's provider,
//! which assigns on the owner and flows back through the same path.
//!
//! Iterations registered here react to changes of their `items`, `start`,
//! `end` and `template` attributes. Those rebuilds are dispatched with
//! `spawn_local`, so registries holding iterations must be used inside a
//! `tokio::task::LocalSet`.

use crate::error::{RuntimeError, RuntimeResult};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use tracing::{debug, instrument, trace};
use trellis_attributes::{
    AccessControl, AccessPolicy, AttributeDef, AttributeDefSet, AttributeStore, AttributeType,
    SetOutcome, ValueFactory,
};
use trellis_common::{
    split_path, ComponentHost, ComponentId, DefDescriptor, ErrorReporter, Value, ValueProvider,
};
use trellis_expression::{
    ComponentTree, ExpressionService, ExpressionValueFactory, LocatorDefs, ProviderLookup,
    ScopeNotifier, WrapperKind,
};
use trellis_iteration::{iteration_defs, Iteration, END, ITEMS, START, TEMPLATE};

/// Root segment of attribute expressions (`v.label`)
pub const VIEW_PROVIDER: &str = "v";

/// Everything needed to create a component
#[derive(Clone)]
pub struct ComponentConfig {
    pub descriptor: DefDescriptor,
    pub local_id: Option<String>,
    pub owner: Option<ComponentId>,
    pub super_component: Option<ComponentId>,
    pub wrapper: Option<WrapperKind>,
    pub locators: Option<Rc<LocatorDefs>>,
    /// Falls back to the registered type, then to undeclared `object` attributes
    pub defs: Option<Rc<AttributeDefSet>>,
    /// Attribute configuration: JSON literals or `{!expr}` / `{#expr}` strings
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub value_provider: Option<Weak<dyn ValueProvider>>,
}

impl ComponentConfig {
    pub fn new(descriptor: DefDescriptor) -> Self {
        Self {
            descriptor,
            local_id: None,
            owner: None,
            super_component: None,
            wrapper: None,
            locators: None,
            defs: None,
            attributes: BTreeMap::new(),
            value_provider: None,
        }
    }

    /// Config of an iteration component
    pub fn iteration() -> Self {
        Self::new(DefDescriptor::new("trellis", "iteration"))
            .wrapper(WrapperKind::Iteration)
            .defs(iteration_defs())
    }

    pub fn local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    pub fn owner(mut self, owner: ComponentId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn super_component(mut self, super_component: ComponentId) -> Self {
        self.super_component = Some(super_component);
        self
    }

    pub fn wrapper(mut self, wrapper: WrapperKind) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    pub fn locators(mut self, locators: LocatorDefs) -> Self {
        self.locators = Some(Rc::new(locators));
        self
    }

    pub fn defs(mut self, defs: AttributeDefSet) -> Self {
        self.defs = Some(Rc::new(defs));
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn value_provider(mut self, provider: Weak<dyn ValueProvider>) -> Self {
        self.value_provider = Some(provider);
        self
    }
}

/// Change notification received by a component
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub expression: String,
    pub old: Value,
    pub new: Value,
}

struct ComponentNode {
    descriptor: DefDescriptor,
    local_id: Option<String>,
    owner: Option<ComponentId>,
    super_component: Option<ComponentId>,
    sub_component: Cell<Option<ComponentId>>,
    wrapper: Option<WrapperKind>,
    locators: Option<Rc<LocatorDefs>>,
    config: BTreeMap<String, serde_json::Value>,
    attributes: Rc<AttributeStore>,
    provider: Rc<ComponentProvider>,
    value_provider: Option<Weak<dyn ValueProvider>>,
    children: RefCell<Vec<ComponentId>>,
    rendered: Cell<bool>,
    auto_destroy: Cell<bool>,
    dirty: RefCell<BTreeSet<String>>,
    changes: RefCell<Vec<ChangeEvent>>,
}

/// `v` provider of one component
struct ComponentProvider {
    registry: Weak<ComponentRegistry>,
    id: ComponentId,
}

fn view_path(expression: &str) -> Option<&str> {
    expression
        .strip_prefix(VIEW_PROVIDER)
        .and_then(|rest| rest.strip_prefix('.'))
}

impl ValueProvider for ComponentProvider {
    fn get_value(&self, expression: &str) -> Value {
        let (Some(registry), Some(path)) = (self.registry.upgrade(), view_path(expression)) else {
            return Value::Undefined;
        };
        registry.get_attribute(self.id, path).unwrap_or_else(|e| {
            debug!(component = %self.id, error = %e, "attribute read failed");
            Value::Undefined
        })
    }

    fn set_value(&self, expression: &str, value: Value) -> bool {
        let (Some(registry), Some(path)) = (self.registry.upgrade(), view_path(expression)) else {
            return false;
        };
        match registry.set_attribute(self.id, path, value) {
            Ok(outcome) => outcome != SetOutcome::Rejected,
            Err(e) => {
                registry.reporter.warning(&e.to_string());
                false
            }
        }
    }
}

pub struct ComponentRegistry {
    me: Weak<ComponentRegistry>,
    expressions: Rc<ExpressionService>,
    access: Rc<dyn AccessControl>,
    policy: AccessPolicy,
    reporter: Rc<dyn ErrorReporter>,
    nodes: RefCell<BTreeMap<ComponentId, Rc<ComponentNode>>>,
    types: RefCell<BTreeMap<DefDescriptor, Rc<AttributeDefSet>>>,
    iterations: RefCell<BTreeMap<ComponentId, Rc<Iteration>>>,
    next_id: Cell<u64>,
}

impl ComponentRegistry {
    /// Creates the registry and installs it as the expression service's notifier
    pub fn new(
        expressions: Rc<ExpressionService>,
        access: Rc<dyn AccessControl>,
        policy: AccessPolicy,
        reporter: Rc<dyn ErrorReporter>,
    ) -> Rc<Self> {
        let registry = Rc::new_cyclic(|me| Self {
            me: me.clone(),
            expressions,
            access,
            policy,
            reporter,
            nodes: RefCell::new(BTreeMap::new()),
            types: RefCell::new(BTreeMap::new()),
            iterations: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
        });
        let notifier: Rc<dyn ScopeNotifier> = registry.clone();
        registry.expressions.set_notifier(Rc::downgrade(&notifier));
        registry
    }

    /// Declares the attributes of a component type
    pub fn register_type(&self, descriptor: DefDescriptor, defs: AttributeDefSet) {
        self.types.borrow_mut().insert(descriptor, Rc::new(defs));
    }

    fn node(&self, id: ComponentId) -> Option<Rc<ComponentNode>> {
        self.nodes.borrow().get(&id).cloned()
    }

    fn require(&self, id: ComponentId) -> RuntimeResult<Rc<ComponentNode>> {
        self.node(id).ok_or(RuntimeError::UnknownComponent(id))
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.nodes.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    #[instrument(skip(self, config), fields(descriptor = %config.descriptor))]
    pub fn create_component(&self, config: ComponentConfig) -> RuntimeResult<ComponentId> {
        for related in [config.owner, config.super_component].into_iter().flatten() {
            if !self.contains(related) {
                return Err(RuntimeError::UnknownComponent(related));
            }
        }

        let defs = match config.defs {
            Some(defs) => defs,
            None => {
                let registered = self.types.borrow().get(&config.descriptor).cloned();
                registered.unwrap_or_else(|| Rc::new(implicit_defs(&config.attributes)))
            }
        };

        let id = ComponentId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let lookup: Weak<dyn ProviderLookup> = self.me.clone();
        let factory = Rc::new(ExpressionValueFactory::new(self.expressions.clone(), lookup));
        let attributes = Rc::new(
            AttributeStore::new(defs)
                .with_access(self.access.clone(), self.policy)
                .with_reporter(self.reporter.clone())
                .with_factory(factory.clone()),
        );

        let node = Rc::new(ComponentNode {
            descriptor: config.descriptor,
            local_id: config.local_id,
            owner: config.owner,
            super_component: config.super_component,
            sub_component: Cell::new(None),
            wrapper: config.wrapper,
            locators: config.locators,
            config: config.attributes,
            attributes: attributes.clone(),
            provider: Rc::new(ComponentProvider {
                registry: self.me.clone(),
                id,
            }),
            value_provider: config.value_provider,
            children: RefCell::new(Vec::new()),
            rendered: Cell::new(false),
            auto_destroy: Cell::new(true),
            dirty: RefCell::new(BTreeSet::new()),
            changes: RefCell::new(Vec::new()),
        });
        // Registered before initialisation: attribute expressions look up
        // the component's provider.
        self.nodes.borrow_mut().insert(id, node.clone());

        let values: BTreeMap<String, Value> = node
            .config
            .iter()
            .map(|(name, raw)| (name.clone(), factory.create(raw, id)))
            .collect();
        attributes.initialize(&values, id);

        let names: Vec<String> = attributes.defs().names().map(str::to_string).collect();
        for name in names {
            self.listen(id, &name, &attributes.get_raw(&name));
        }

        if let Some(owner) = node.owner.and_then(|owner| self.node(owner)) {
            owner.children.borrow_mut().push(id);
        }
        if let Some(super_node) = node.super_component.and_then(|s| self.node(s)) {
            super_node.sub_component.set(Some(id));
        }

        debug!(component = %id, local_id = ?node.local_id, "created component");
        Ok(id)
    }

    /// Registers `id` as a consumer of the reference held by its attribute `name`
    fn listen(&self, id: ComponentId, name: &str, value: &Value) {
        let Some((scope, expression)) = value
            .as_lazy()
            .and_then(|lazy| lazy.reference_key().map(|(s, e)| (s, e.to_string())))
        else {
            return;
        };
        let reference = match scope {
            None => self.expressions.get_global_reference(&expression),
            Some(scope) => match self.provider_for(id) {
                Some(provider) => self.expressions.get_reference(&expression, scope, provider),
                None => return,
            },
        };
        let consumer = format!("{}.{}", VIEW_PROVIDER, name);
        if let Err(e) = self
            .expressions
            .add_expression_listener(&reference, &consumer, id)
        {
            self.reporter.warning(&e.to_string());
        }
    }

    pub fn get_attribute(&self, id: ComponentId, path: &str) -> RuntimeResult<Value> {
        let node = self.require(id)?;
        Ok(node.attributes.get(path, id)?)
    }

    /// Writes an attribute. Assignments invalidate the references the
    /// component owns on the written path.
    pub fn set_attribute(&self, id: ComponentId, path: &str, value: Value) -> RuntimeResult<SetOutcome> {
        let node = self.require(id)?;
        let outcome = node.attributes.set(path, value, id)?;
        if outcome != SetOutcome::Assigned {
            return Ok(outcome);
        }

        let segments = split_path(path);
        let mut notified = 0;
        for depth in 1..=segments.len() {
            let expression = format!("{}.{}", VIEW_PROVIDER, segments[..depth].join("."));
            notified += self.expressions.update_reference(&expression, id);
        }
        trace!(component = %id, path, notified, "attribute assigned");

        if let Some(attribute) = segments.first() {
            self.schedule_iteration_change(id, attribute);
        }
        Ok(outcome)
    }

    /// A variable of the component's own value provider changed: re-evaluates
    /// the references it owns on that variable
    pub fn scope_variable_changed(&self, id: ComponentId, variable: &str) -> usize {
        if !self.contains(id) {
            return 0;
        }
        let notified = self.expressions.update_references_under(variable, id);
        trace!(component = %id, variable, notified, "scope variable changed");
        notified
    }

    pub fn attributes(&self, id: ComponentId) -> Option<Rc<AttributeStore>> {
        self.node(id).map(|node| node.attributes.clone())
    }

    pub fn owner_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.node(id).and_then(|node| node.owner)
    }

    pub fn children(&self, id: ComponentId) -> Vec<ComponentId> {
        self.node(id)
            .map(|node| node.children.borrow().clone())
            .unwrap_or_default()
    }

    /// The component's own `v` provider
    pub fn provider(&self, id: ComponentId) -> Option<Rc<dyn ValueProvider>> {
        self.node(id).map(|node| {
            let provider: Rc<dyn ValueProvider> = node.provider.clone();
            provider
        })
    }

    pub fn mark_rendered(&self, id: ComponentId) {
        if let Some(node) = self.node(id) {
            node.rendered.set(true);
        }
    }

    pub fn set_auto_destroy(&self, id: ComponentId, auto_destroy: bool) {
        if let Some(node) = self.node(id) {
            node.auto_destroy.set(auto_destroy);
        }
    }

    /// Expressions marked dirty since the last [`clear_dirty`](Self::clear_dirty)
    pub fn dirty_expressions(&self, id: ComponentId) -> Vec<String> {
        self.node(id)
            .map(|node| node.dirty.borrow().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_dirty(&self, id: ComponentId) {
        if let Some(node) = self.node(id) {
            node.dirty.borrow_mut().clear();
        }
    }

    pub fn changes(&self, id: ComponentId) -> Vec<ChangeEvent> {
        self.node(id)
            .map(|node| node.changes.borrow().clone())
            .unwrap_or_default()
    }

    /// Config that recreates `id`: same type, local id, definitions and
    /// attribute configuration
    pub fn template_config(&self, id: ComponentId) -> Option<ComponentConfig> {
        let node = self.node(id)?;
        let mut config = ComponentConfig::new(node.descriptor.clone());
        config.local_id = node.local_id.clone();
        config.locators = node.locators.clone();
        config.defs = Some(node.attributes.defs());
        config.attributes = node.config.clone();
        Some(config)
    }

    pub fn register_iteration(&self, id: ComponentId, iteration: Rc<Iteration>) {
        self.iterations.borrow_mut().insert(id, iteration);
    }

    pub fn iteration(&self, id: ComponentId) -> Option<Rc<Iteration>> {
        self.iterations.borrow().get(&id).cloned()
    }

    fn schedule_iteration_change(&self, id: ComponentId, attribute: &str) {
        if !matches!(attribute, ITEMS | START | END | TEMPLATE) {
            return;
        }
        let Some(iteration) = self.iteration(id) else {
            return;
        };
        let attribute = attribute.to_string();
        debug!(iteration = %id, attribute = %attribute, "scheduling iteration rebuild");
        tokio::task::spawn_local(async move {
            iteration.on_change(&attribute).await;
        });
    }

    /// Destroys a component, its attribute store, the components it owns
    /// and its super component, then releases the references it owns.
    /// Returns false when `id` was not live.
    #[instrument(skip(self))]
    pub fn destroy_component(&self, id: ComponentId) -> bool {
        let Some(node) = self.nodes.borrow_mut().remove(&id) else {
            return false;
        };
        if let Some(owner) = node.owner.and_then(|owner| self.node(owner)) {
            owner.children.borrow_mut().retain(|child| *child != id);
        }
        self.iterations.borrow_mut().remove(&id);

        let expressions = node.attributes.destroy(self);
        for child in node.children.take() {
            self.destroy_component(child);
        }
        if let Some(super_component) = node.super_component {
            self.destroy_component(super_component);
        }
        self.expressions.clear_references(id);

        debug!(released = expressions.len(), "destroyed component");
        true
    }
}

/// Undeclared attributes are plain `object` attributes
fn implicit_defs(attributes: &BTreeMap<String, serde_json::Value>) -> AttributeDefSet {
    AttributeDefSet::new(
        attributes
            .keys()
            .map(|name| AttributeDef::new(name.clone(), AttributeType::Object))
            .collect(),
    )
}

impl ComponentHost for ComponentRegistry {
    fn is_valid(&self, id: ComponentId) -> bool {
        self.contains(id)
    }

    fn is_rendered(&self, id: ComponentId) -> bool {
        self.node(id).map(|node| node.rendered.get()).unwrap_or(false)
    }

    fn auto_destroy(&self, id: ComponentId) -> bool {
        self.node(id).map(|node| node.auto_destroy.get()).unwrap_or(false)
    }

    fn destroy(&self, id: ComponentId) {
        self.destroy_component(id);
    }
}

/// Host handed to iterations, so they do not keep the registry alive
pub struct RegistryHost {
    registry: Weak<ComponentRegistry>,
}

impl RegistryHost {
    pub fn new(registry: Weak<ComponentRegistry>) -> Self {
        Self { registry }
    }
}

impl ComponentHost for RegistryHost {
    fn is_valid(&self, id: ComponentId) -> bool {
        self.registry.upgrade().is_some_and(|r| r.contains(id))
    }

    fn is_rendered(&self, id: ComponentId) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|r| ComponentHost::is_rendered(&*r, id))
    }

    fn auto_destroy(&self, id: ComponentId) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|r| ComponentHost::auto_destroy(&*r, id))
    }

    fn destroy(&self, id: ComponentId) {
        if let Some(registry) = self.registry.upgrade() {
            registry.destroy_component(id);
        }
    }
}

impl ScopeNotifier for ComponentRegistry {
    fn is_valid(&self, scope: ComponentId) -> bool {
        self.contains(scope)
    }

    fn mark_dirty(&self, scope: ComponentId, expression: &str) {
        if let Some(node) = self.node(scope) {
            node.dirty.borrow_mut().insert(expression.to_string());
        }
    }

    fn fire_change(&self, scope: ComponentId, expression: &str, old: &Value, new: &Value) {
        let Some(node) = self.node(scope) else {
            return;
        };
        node.changes.borrow_mut().push(ChangeEvent {
            expression: expression.to_string(),
            old: old.clone(),
            new: new.clone(),
        });
        if let Some(attribute) = view_path(expression).and_then(|path| split_path(path).first().copied()) {
            self.schedule_iteration_change(scope, attribute);
        }
    }

    fn clear_reference(&self, scope: ComponentId, expression: &str) {
        let (Some(node), Some(path)) = (self.node(scope), view_path(expression)) else {
            return;
        };
        if node.attributes.clear_reference(path).is_some() {
            debug!(component = %scope, path, "cleared orphaned reference");
        }
    }
}

impl ComponentTree for ComponentRegistry {
    fn owner(&self, id: ComponentId) -> Option<ComponentId> {
        self.owner_of(id)
    }

    fn wrapper_kind(&self, id: ComponentId) -> Option<WrapperKind> {
        self.node(id).and_then(|node| node.wrapper)
    }

    fn local_id(&self, id: ComponentId) -> Option<String> {
        self.node(id).and_then(|node| node.local_id.clone())
    }

    fn super_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.node(id).and_then(|node| node.super_component)
    }

    fn concrete(&self, id: ComponentId) -> ComponentId {
        let mut current = id;
        let mut visited = BTreeSet::new();
        while let Some(sub) = self.node(current).and_then(|node| node.sub_component.get()) {
            if !visited.insert(current) {
                break;
            }
            current = sub;
        }
        current
    }

    fn locator_defs(&self, id: ComponentId) -> Option<Rc<LocatorDefs>> {
        self.node(id).and_then(|node| node.locators.clone())
    }

    fn def_name(&self, id: ComponentId) -> String {
        self.node(id)
            .map(|node| node.descriptor.to_string())
            .unwrap_or_default()
    }

    fn is_valid(&self, id: ComponentId) -> bool {
        self.contains(id)
    }

    fn evaluate_in(&self, id: ComponentId, expression: &str) -> Value {
        self.node(id)
            .map(|node| node.provider.get_value(expression))
            .unwrap_or_default()
    }
}

impl ProviderLookup for ComponentRegistry {
    fn provider_for(&self, owner: ComponentId) -> Option<Weak<dyn ValueProvider>> {
        let node = self.node(owner)?;
        if let Some(custom) = &node.value_provider {
            return Some(custom.clone());
        }
        let target = node.owner.and_then(|o| self.node(o)).unwrap_or(node);
        let provider: Rc<dyn ValueProvider> = target.provider.clone();
        Some(Rc::downgrade(&provider))
    }

    fn scope_for(&self, owner: ComponentId) -> ComponentId {
        match self.node(owner) {
            Some(node) if node.value_provider.is_none() => node.owner.unwrap_or(owner),
            _ => owner,
        }
    }
}
