//! Component construction boundary used by the reconciler.

use crate::error::{BuildError, BuildResult};
use crate::scope::ItemScope;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use trellis_common::{ComponentId, Value};

/// Builds the components of one item from the iteration template
pub trait ComponentFactory {
    /// Synchronous construction, used for the initial local build
    fn create_local(&self, template: &[Value], scope: Rc<ItemScope>) -> BuildResult<Vec<ComponentId>>;

    /// Construction that may wait on other work, such as definition loads
    fn create_async(
        &self,
        template: &[Value],
        scope: Rc<ItemScope>,
    ) -> LocalBoxFuture<'static, BuildResult<Vec<ComponentId>>>;
}

/// Mock factory for testing.
///
/// Each template entry becomes one component. Async builds of later items
/// finish first, so completion order is the reverse of item order.
#[derive(Default)]
pub struct MockFactory {
    next_id: Cell<u64>,
    scopes: RefCell<BTreeMap<ComponentId, Rc<ItemScope>>>,
    failing: RefCell<BTreeSet<usize>>,
    panicking: RefCell<BTreeSet<usize>>,
    builds: Cell<usize>,
    completed: Rc<RefCell<Vec<usize>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(100),
            ..Default::default()
        }
    }

    /// Builds of the item at `index` return an error
    pub fn fail_at(&self, index: usize) {
        self.failing.borrow_mut().insert(index);
    }

    /// Builds of the item at `index` panic
    pub fn panic_at(&self, index: usize) {
        self.panicking.borrow_mut().insert(index);
    }

    /// Scope a component was built on
    pub fn scope_of(&self, id: ComponentId) -> Option<Rc<ItemScope>> {
        self.scopes.borrow().get(&id).cloned()
    }

    /// Item indexes in the order their async builds finished
    pub fn completed(&self) -> Vec<usize> {
        self.completed.borrow().clone()
    }

    /// Number of item builds so far
    pub fn builds(&self) -> usize {
        self.builds.get()
    }

    fn build(&self, template: &[Value], scope: Rc<ItemScope>) -> BuildResult<Vec<ComponentId>> {
        let index = scope.index();
        self.builds.set(self.builds.get() + 1);
        if self.panicking.borrow().contains(&index) {
            panic!("template for item {} exploded", index);
        }
        if self.failing.borrow().contains(&index) {
            return Err(BuildError::Failed(format!("item {} rejected", index)));
        }

        let mut components = Vec::with_capacity(template.len());
        for _ in template {
            let id = ComponentId(self.next_id.get());
            self.next_id.set(id.0 + 1);
            self.scopes.borrow_mut().insert(id, scope.clone());
            components.push(id);
        }
        Ok(components)
    }
}

impl ComponentFactory for MockFactory {
    fn create_local(&self, template: &[Value], scope: Rc<ItemScope>) -> BuildResult<Vec<ComponentId>> {
        self.build(template, scope)
    }

    fn create_async(
        &self,
        template: &[Value],
        scope: Rc<ItemScope>,
    ) -> LocalBoxFuture<'static, BuildResult<Vec<ComponentId>>> {
        let index = scope.index();
        let delay = 8usize.saturating_sub(index);
        let result = self.build(template, scope);
        let completed = self.completed.clone();
        async move {
            for _ in 0..delay {
                tokio::task::yield_now().await;
            }
            completed.borrow_mut().push(index);
            result
        }
        .boxed_local()
    }
}
