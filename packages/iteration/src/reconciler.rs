//! # Iteration Reconciler
//!
//! ## Purpose
//!
//! Produces the body of a list-bound iteration: one group of components per
//! item in `[start, end)`, built from the iteration's template.
//!
//! ## Builds
//!
//! Item builds run concurrently and may complete in any order. Each result
//! is written into the slot of its position, so the body always follows item
//! order. A failed or panicking build is reported and leaves its slot empty.
//!
//! ## Updates
//!
//! An update reuses the components of every item that is still present,
//! matched by identity. A reused item that moved only has its scope
//! relocated. Updates requested while a build is in flight are coalesced
//! into one more pass after it completes.

use crate::error::{BuildError, BuildResult};
use crate::factory::ComponentFactory;
use crate::range::{get_end, get_start};
use crate::scope::ItemScope;
use futures::future::{ready, FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::{debug, info, instrument, trace, warn};
use trellis_attributes::{AttributeDef, AttributeDefSet, AttributeStore, AttributeType, BODY};
use trellis_common::{ComponentHost, ComponentId, ErrorReporter, TracingReporter, Value, ValueProvider};

pub const ITERATION_DESCRIPTOR: &str = "markup://trellis:iteration";

pub const ITEMS: &str = "items";
pub const TEMPLATE: &str = "template";
pub const VAR: &str = "var";
pub const INDEX_VAR: &str = "indexVar";
pub const START: &str = "start";
pub const END: &str = "end";
pub const LOADED: &str = "loaded";
pub const FORCE_SERVER: &str = "forceServer";

/// Declared attributes of an iteration
pub fn iteration_defs() -> AttributeDefSet {
    AttributeDefSet::new(vec![
        AttributeDef::new(ITEMS, AttributeType::List),
        AttributeDef::new(VAR, AttributeType::String).with_default(json!("item")),
        AttributeDef::new(INDEX_VAR, AttributeType::String).with_default(json!("index")),
        AttributeDef::new(START, AttributeType::Number),
        AttributeDef::new(END, AttributeType::Number),
        AttributeDef::new(LOADED, AttributeType::Boolean).with_default(json!(false)),
        AttributeDef::new(TEMPLATE, AttributeType::ComponentList).with_default(json!([])),
        AttributeDef::new(BODY, AttributeType::ComponentList),
        AttributeDef::new(FORCE_SERVER, AttributeType::Boolean).with_default(json!(false)),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOperation {
    Initialize,
    Update,
}

impl fmt::Display for IterationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationOperation::Initialize => write!(f, "Initialize"),
            IterationOperation::Update => write!(f, "Update"),
        }
    }
}

/// Components built for one item, and where the item was last placed
#[derive(Debug, Clone)]
pub struct ItemBinding {
    pub item: Value,
    pub index: usize,
    pub components: Vec<ComponentId>,
    pub scope: Rc<ItemScope>,
}

/// Outcome of one build pass
#[derive(Debug, Clone, PartialEq)]
pub struct BodyReport {
    pub operation: IterationOperation,
    pub body: Vec<ComponentId>,
    /// Items whose components were kept from the previous pass
    pub reused: usize,
    /// Items built from the template
    pub built: usize,
    pub failed: usize,
    /// Previous bindings with no item in the new range
    pub orphaned: usize,
}

impl BodyReport {
    fn new(operation: IterationOperation) -> Self {
        Self {
            operation,
            body: Vec::new(),
            reused: 0,
            built: 0,
            failed: 0,
            orphaned: 0,
        }
    }
}

/// Notified after every completed pass
pub trait IterationListener {
    fn iteration_complete(&self, iteration: ComponentId, report: &BodyReport);
}

pub struct Iteration {
    id: ComponentId,
    owner: Option<ComponentId>,
    attributes: Rc<AttributeStore>,
    factory: Rc<dyn ComponentFactory>,
    host: Rc<dyn ComponentHost>,
    reporter: Rc<dyn ErrorReporter>,
    template_provider: Option<Weak<dyn ValueProvider>>,
    item_info: RefCell<Vec<ItemBinding>>,
    queued: Cell<bool>,
    listeners: RefCell<Vec<Rc<dyn IterationListener>>>,
}

impl Iteration {
    pub fn new(
        id: ComponentId,
        attributes: Rc<AttributeStore>,
        factory: Rc<dyn ComponentFactory>,
        host: Rc<dyn ComponentHost>,
    ) -> Self {
        Self {
            id,
            owner: None,
            attributes,
            factory,
            host,
            reporter: Rc::new(TracingReporter),
            template_provider: None,
            item_info: RefCell::new(Vec::new()),
            queued: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn with_owner(mut self, owner: ComponentId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Provider that item scopes fall through to
    pub fn with_template_provider(mut self, provider: Weak<dyn ValueProvider>) -> Self {
        self.template_provider = Some(provider);
        self
    }

    pub fn add_listener(&self, listener: Rc<dyn IterationListener>) {
        self.listeners.borrow_mut().push(listener);
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn attributes(&self) -> &Rc<AttributeStore> {
        &self.attributes
    }

    pub fn start(&self) -> usize {
        get_start(&self.attributes.get_value(START))
    }

    pub fn end(&self) -> usize {
        get_end(&self.attributes.get_value(ITEMS), &self.attributes.get_value(END))
    }

    pub fn is_loaded(&self) -> bool {
        self.attributes.get_value(LOADED).as_bool() == Some(true)
    }

    pub fn is_queued(&self) -> bool {
        self.queued.get()
    }

    pub fn body(&self) -> Vec<ComponentId> {
        self.attributes
            .get_body(self.id)
            .items()
            .iter()
            .filter_map(Value::as_component)
            .collect()
    }

    pub fn bindings(&self) -> Vec<ItemBinding> {
        self.item_info.borrow().clone()
    }

    /// First build. Components placed directly in the body become the
    /// template when no template was given.
    pub async fn init(&self) -> BodyReport {
        let body_template = self.attributes.get_body(self.id);
        let template = self.attributes.get_value(TEMPLATE);
        if body_template.len().unwrap_or(0) > 0 && template.len().unwrap_or(0) == 0 {
            self.set_attribute(BODY, Value::empty_list());
            self.set_attribute(TEMPLATE, body_template);
        }
        self.create_body(true).await
    }

    /// Reacts to a change of one of the iteration's attributes
    pub async fn on_change(&self, attribute: &str) -> Option<BodyReport> {
        match attribute {
            ITEMS | START | END => self.update_body().await,
            TEMPLATE => Some(self.create_body(false).await),
            _ => None,
        }
    }

    /// Builds the body from scratch
    #[instrument(skip(self), fields(iteration = %self.id))]
    pub async fn create_body(&self, local: bool) -> BodyReport {
        self.set_attribute(LOADED, Value::from(false));
        self.item_info.borrow_mut().clear();

        let report = self
            .build_body(IterationOperation::Initialize, local, Vec::new())
            .await;
        self.finish(&report);

        if self.queued.replace(false) {
            debug!("running queued update");
            if let Some(update) = self.update_body().await {
                return update;
            }
        }
        report
    }

    /// Rebuilds the body, reusing components of items still present.
    /// Returns `None` when the update was queued behind a build in flight.
    #[instrument(skip(self), fields(iteration = %self.id))]
    pub async fn update_body(&self) -> Option<BodyReport> {
        if self.attributes.get_value(LOADED).as_bool() == Some(false) {
            debug!("build in flight, queueing update");
            self.queued.set(true);
            return None;
        }

        loop {
            self.clear_unrendered_body();
            self.set_attribute(LOADED, Value::from(false));
            let previous = std::mem::take(&mut *self.item_info.borrow_mut());

            let report = self
                .build_body(IterationOperation::Update, false, previous)
                .await;
            self.finish(&report);

            if !self.queued.replace(false) {
                return Some(report);
            }
            debug!("running queued update");
        }
    }

    /// Destroys body components that were built but never rendered. Returns
    /// how many were destroyed.
    pub fn clear_unrendered_body(&self) -> usize {
        let cleaned: Vec<ComponentId> = self
            .body()
            .into_iter()
            .filter(|id| self.host.is_valid(*id) && !self.host.is_rendered(*id))
            .collect();
        if cleaned.is_empty() {
            return 0;
        }

        for id in &cleaned {
            self.host.destroy(*id);
        }
        self.item_info
            .borrow_mut()
            .retain(|binding| !binding.components.iter().any(|c| cleaned.contains(c)));

        let owner = self
            .owner
            .map(|owner| owner.to_string())
            .unwrap_or_else(|| "none".to_string());
        warn!(iteration = %self.id, cleaned = cleaned.len(), "unrendered body cleared");
        self.reporter.warning(&format!(
            "[Performance degradation] {} [id:{}] in [{}] had multiple items set in the same cycle.",
            ITERATION_DESCRIPTOR, self.id, owner
        ));
        cleaned.len()
    }

    async fn build_body(
        &self,
        operation: IterationOperation,
        local: bool,
        mut previous: Vec<ItemBinding>,
    ) -> BodyReport {
        let mut report = BodyReport::new(operation);
        let items = self.attributes.get_value(ITEMS).items();
        let template = self.attributes.get_value(TEMPLATE).items();
        let start = self.start();
        let end = self.end();

        if items.is_empty() || template.is_empty() || start >= end {
            report.orphaned = previous.len();
            return report;
        }

        let item_var = self.string_attribute(VAR, "item");
        let index_var = self.string_attribute(INDEX_VAR, "index");
        let local = local && self.attributes.get_value(FORCE_SERVER).as_bool() != Some(true);

        let mut slots: Vec<Option<Vec<ComponentId>>> = vec![None; end - start];
        let mut bindings = Vec::with_capacity(end - start);
        let mut pending = FuturesUnordered::new();

        for index in start..end {
            let item = items.get(index).cloned().unwrap_or_default();
            let slot = index - start;

            if let Some(position) = previous.iter().position(|b| b.item.same_identity(&item)) {
                let binding = previous.remove(position);
                if binding.index != index {
                    trace!(from = binding.index, to = index, "relocating item scope");
                    binding.scope.relocate(item, index);
                }
                report.reused += 1;
                slots[slot] = Some(binding.components.clone());
                bindings.push(ItemBinding { index, ..binding });
                continue;
            }

            let scope = Rc::new(ItemScope::new(
                item_var.as_str(),
                index_var.as_str(),
                item.clone(),
                index,
                self.template_provider.clone(),
            ));
            pending.push(
                self.build_item(&template, scope.clone(), local)
                    .map(move |result| (slot, item, scope, result)),
            );
        }

        while let Some((slot, item, scope, result)) = pending.next().await {
            match result {
                Ok(components) => {
                    report.built += 1;
                    slots[slot] = Some(components.clone());
                    bindings.push(ItemBinding {
                        item,
                        index: scope.index(),
                        components,
                        scope,
                    });
                }
                Err(error) => {
                    report.failed += 1;
                    self.reporter.error(&format!(
                        "Error building item {} of {} [id:{}]: {}",
                        scope.index(),
                        ITERATION_DESCRIPTOR,
                        self.id,
                        error
                    ));
                }
            }
        }

        bindings.sort_by_key(|binding| binding.index);
        *self.item_info.borrow_mut() = bindings;
        report.body = slots.into_iter().flatten().flatten().collect();
        report.orphaned = previous.len();
        if report.orphaned > 0 {
            debug!(orphaned = report.orphaned, "bindings left for teardown");
        }
        report
    }

    fn build_item(
        &self,
        template: &[Value],
        scope: Rc<ItemScope>,
        local: bool,
    ) -> LocalBoxFuture<'static, BuildResult<Vec<ComponentId>>> {
        if local {
            let result = catch_unwind(AssertUnwindSafe(|| self.factory.create_local(template, scope)))
                .unwrap_or_else(|panic| Err(BuildError::Panicked(panic_message(&*panic))));
            return ready(result).boxed_local();
        }

        match catch_unwind(AssertUnwindSafe(|| self.factory.create_async(template, scope))) {
            Ok(build) => AssertUnwindSafe(build)
                .catch_unwind()
                .map(|outcome| {
                    outcome.unwrap_or_else(|panic| Err(BuildError::Panicked(panic_message(&*panic))))
                })
                .boxed_local(),
            Err(panic) => ready(Err(BuildError::Panicked(panic_message(&*panic)))).boxed_local(),
        }
    }

    fn finish(&self, report: &BodyReport) {
        let body = Value::list(report.body.iter().copied().map(Value::Component));
        self.set_attribute(BODY, body);
        self.set_attribute(LOADED, Value::from(true));
        info!(
            iteration = %self.id,
            operation = %report.operation,
            components = report.body.len(),
            reused = report.reused,
            built = report.built,
            "iteration complete"
        );

        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener.iteration_complete(self.id, report);
        }
    }

    fn string_attribute(&self, name: &str, fallback: &str) -> String {
        self.attributes
            .get_value(name)
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    fn set_attribute(&self, name: &str, value: Value) {
        if let Err(e) = self.attributes.set(name, value, self.id) {
            warn!(attribute = name, error = %e, "iteration attribute not set");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
