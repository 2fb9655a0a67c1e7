//! # Definition Loader
//!
//! ## Purpose
//!
//! Batches definition requests made during one turn into a single dispatch
//! on the next turn, fetches them concurrently and reports the outcome to
//! every caller of the batch.
//!
//! ## Batching
//!
//! The first request of a turn opens a batch and spawns its dispatch with
//! `spawn_local`, so requests issued later in the same turn join it. A
//! descriptor that is already cached is skipped. A descriptor already being
//! fetched by an earlier batch is not requested again: the new batch waits
//! on a shared waiter that resolves when every such fetch has finished.
//!
//! ## Outcome
//!
//! On success each callback runs once, in registration order, with its
//! [`CallbackScope`]. Any failed fetch fails the whole batch and every
//! callback receives the first error. The other fetches of the batch still
//! run, so every requested descriptor ends up cached or released. A panicking callback is reported and
//! does not stop its siblings. A failed batch with no callbacks is reported.
//!
//! Must be used inside a `tokio::task::LocalSet`.

use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::registry::DefinitionCache;
use crate::transport::{LoaderErrorTable, Transport};
use crate::uri::{DefinitionRequests, PlannedUri, UriPlanner};
use futures::channel::oneshot;
use futures::future::{join_all, FutureExt, LocalBoxFuture};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, info, instrument, warn};
use trellis_common::{DefDescriptor, ErrorReporter, TracingReporter};

/// Where a callback sits in its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackScope {
    pub index: usize,
    pub total: usize,
    pub remaining: usize,
}

pub type LoadCallback = Box<dyn FnOnce(LoadResult<CallbackScope>)>;

#[derive(Default)]
struct PendingBatch {
    callbacks: Vec<LoadCallback>,
    requests: DefinitionRequests,
}

/// Completion shared by every batch that coalesced onto in-flight fetches
struct SharedWaiter {
    outstanding: Cell<usize>,
    sender: RefCell<Option<oneshot::Sender<LoadResult<()>>>>,
}

impl SharedWaiter {
    fn finalize(&self) {
        let outstanding = self.outstanding.get().saturating_sub(1);
        self.outstanding.set(outstanding);
        if outstanding == 0 {
            self.send(Ok(()));
        }
    }

    fn reject(&self, error: LoadError) {
        self.send(Err(error));
    }

    fn send(&self, result: LoadResult<()>) {
        if let Some(sender) = self.sender.borrow_mut().take() {
            let _ = sender.send(result);
        }
    }
}

pub struct DefinitionLoader {
    planner: UriPlanner,
    transport: Rc<dyn Transport>,
    cache: Rc<dyn DefinitionCache>,
    errors: Rc<LoaderErrorTable>,
    reporter: Rc<dyn ErrorReporter>,
    pending: RefCell<Option<PendingBatch>>,
    requested: RefCell<BTreeMap<DefDescriptor, Vec<Rc<SharedWaiter>>>>,
    loading: Cell<usize>,
    connected: Cell<bool>,
}

impl DefinitionLoader {
    pub fn new(
        config: LoaderConfig,
        transport: Rc<dyn Transport>,
        cache: Rc<dyn DefinitionCache>,
        errors: Rc<LoaderErrorTable>,
    ) -> Self {
        Self {
            planner: UriPlanner::new(config),
            transport,
            cache,
            errors,
            reporter: Rc::new(TracingReporter),
            pending: RefCell::new(None),
            requested: RefCell::new(BTreeMap::new()),
            loading: Cell::new(0),
            connected: Cell::new(true),
        }
    }

    pub fn with_reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn planner(&self) -> &UriPlanner {
        &self.planner
    }

    /// Batches currently being fetched
    pub fn loading(&self) -> usize {
        self.loading.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    /// Adds `requests` and `callback` to the open batch, opening one if needed
    pub fn load_component_defs(
        self: &Rc<Self>,
        requests: impl IntoIterator<Item = (DefDescriptor, Option<String>)>,
        callback: impl FnOnce(LoadResult<CallbackScope>) + 'static,
    ) {
        self.enqueue(requests, Some(Box::new(callback)));
    }

    /// Single-descriptor form of [`load_component_defs`](Self::load_component_defs)
    pub fn load_component_def(
        self: &Rc<Self>,
        descriptor: DefDescriptor,
        uid: Option<String>,
        callback: impl FnOnce(LoadResult<CallbackScope>) + 'static,
    ) {
        self.load_component_defs([(descriptor, uid)], callback);
    }

    /// Requests definitions without waiting for them. Failures are reported.
    pub fn prefetch(self: &Rc<Self>, requests: impl IntoIterator<Item = (DefDescriptor, Option<String>)>) {
        self.enqueue(requests, None);
    }

    fn enqueue(
        self: &Rc<Self>,
        requests: impl IntoIterator<Item = (DefDescriptor, Option<String>)>,
        callback: Option<LoadCallback>,
    ) {
        let opened = {
            let mut pending = self.pending.borrow_mut();
            let opened = pending.is_none();
            let batch = pending.get_or_insert_with(PendingBatch::default);
            if let Some(callback) = callback {
                batch.callbacks.push(callback);
            }
            batch.requests.extend(requests);
            opened
        };
        if opened {
            debug!("opened definition batch");
            let loader = self.clone();
            tokio::task::spawn_local(async move { loader.retrieve_pending().await });
        }
    }

    #[instrument(skip(self))]
    async fn retrieve_pending(self: Rc<Self>) {
        let Some(batch) = self.pending.borrow_mut().take() else {
            return;
        };
        let (fresh, waiter) = self.claim(batch.requests);
        let claimed: Vec<DefDescriptor> = fresh.keys().cloned().collect();
        let planned = self.planner.plan(&fresh);
        info!(
            requested = fresh.len(),
            uris = planned.len(),
            callbacks = batch.callbacks.len(),
            "dispatching definition batch"
        );

        let mut fetches: Vec<LocalBoxFuture<'_, LoadResult<()>>> = Vec::new();
        if let Some(waiter) = waiter {
            fetches.push(
                async move { waiter.await.unwrap_or(Err(LoadError::Abandoned)) }.boxed_local(),
            );
        }
        for uri in planned {
            fetches.push(self.fetch(uri).boxed_local());
        }

        self.loading.set(self.loading.get() + 1);
        // Every fetch runs to completion so each one settles its descriptors
        let result = join_all(fetches)
            .await
            .into_iter()
            .find(Result::is_err)
            .unwrap_or(Ok(()));
        self.loading.set(self.loading.get().saturating_sub(1));
        self.settle(&claimed, &result);

        self.complete(batch.callbacks, result);
    }

    /// Drops cached descriptors and attaches already-requested ones to a
    /// shared waiter. Returns what still has to be fetched.
    fn claim(&self, requests: DefinitionRequests) -> (DefinitionRequests, Option<oneshot::Receiver<LoadResult<()>>>) {
        let (sender, receiver) = oneshot::channel();
        let waiter = Rc::new(SharedWaiter {
            outstanding: Cell::new(0),
            sender: RefCell::new(Some(sender)),
        });

        let mut fresh = DefinitionRequests::new();
        let mut requested = self.requested.borrow_mut();
        for (descriptor, uid) in requests {
            if self.cache.has_definition(&descriptor) {
                continue;
            }
            if let Some(waiters) = requested.get_mut(&descriptor) {
                debug!(descriptor = %descriptor, "already requested, coalescing");
                waiters.push(waiter.clone());
                waiter.outstanding.set(waiter.outstanding.get() + 1);
                continue;
            }
            requested.insert(descriptor.clone(), Vec::new());
            fresh.insert(descriptor, uid);
        }

        let receiver = (waiter.outstanding.get() > 0).then_some(receiver);
        (fresh, receiver)
    }

    async fn fetch(&self, planned: PlannedUri) -> LoadResult<()> {
        debug!(uri = %planned.uri, "fetching definitions");
        let outcome = self.transport.fetch_and_execute(&planned.uri).await;
        let in_band = self.errors.take(planned.error_key());

        let error = match (outcome, in_band) {
            (Ok(()), None) => {
                self.process_requested(&planned.descriptors);
                return Ok(());
            }
            (_, Some(message)) => LoadError::Server {
                uri: planned.uri.clone(),
                message,
            },
            (Err(e), None) => {
                warn!(uri = %planned.uri, error = %e, "definition fetch failed, assuming connectivity loss");
                self.connected.set(false);
                LoadError::Unknown {
                    uri: planned.uri.clone(),
                }
            }
        };
        self.reject_pending_requested(&planned.descriptors, &error);
        Err(error)
    }

    /// Finalizes waiters of every requested descriptor that is now cached or
    /// was part of the fetch that just completed
    fn process_requested(&self, fetched: &[DefDescriptor]) {
        let done: Vec<(DefDescriptor, Vec<Rc<SharedWaiter>>)> = {
            let mut requested = self.requested.borrow_mut();
            let ready: Vec<DefDescriptor> = requested
                .keys()
                .filter(|d| fetched.contains(d) || self.cache.has_definition(d))
                .cloned()
                .collect();
            ready
                .into_iter()
                .filter_map(|d| requested.remove(&d).map(|waiters| (d, waiters)))
                .collect()
        };
        for (_, waiters) in done {
            for waiter in waiters {
                waiter.finalize();
            }
        }
    }

    fn reject_pending_requested(&self, descriptors: &[DefDescriptor], error: &LoadError) {
        let rejected: Vec<(DefDescriptor, Vec<Rc<SharedWaiter>>)> = {
            let mut requested = self.requested.borrow_mut();
            descriptors
                .iter()
                .filter_map(|d| requested.remove(d).map(|waiters| (d.clone(), waiters)))
                .collect()
        };
        for (descriptor, waiters) in rejected {
            for waiter in waiters {
                waiter.reject(LoadError::Rejected {
                    descriptor: descriptor.to_string(),
                    message: error.to_string(),
                });
            }
        }
    }

    /// Releases descriptors of this batch that no fetch settled
    fn settle(&self, claimed: &[DefDescriptor], result: &LoadResult<()>) {
        let unsettled: Vec<DefDescriptor> = {
            let requested = self.requested.borrow();
            claimed
                .iter()
                .filter(|d| requested.contains_key(*d))
                .cloned()
                .collect()
        };
        if unsettled.is_empty() {
            return;
        }
        debug!(unsettled = unsettled.len(), "settling descriptors left by the batch");
        match result {
            Ok(()) => self.process_requested(&unsettled),
            Err(error) => self.reject_pending_requested(&unsettled, error),
        }
    }

    fn complete(&self, callbacks: Vec<LoadCallback>, result: LoadResult<()>) {
        let total = callbacks.len();
        match result {
            Ok(()) => {
                for (index, callback) in callbacks.into_iter().enumerate() {
                    let scope = CallbackScope {
                        index,
                        total,
                        remaining: total - index - 1,
                    };
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(Ok(scope)))) {
                        self.reporter.error(&format!(
                            "Error in callback provided to component creation: {}",
                            panic_message(&*panic)
                        ));
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, callbacks = total, "definition batch failed");
                for callback in callbacks {
                    let delivered = error.clone();
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(Err(delivered)))) {
                        self.reporter.error(&format!(
                            "Error in callback provided to component creation: {}\nAdditional exception on component load: {}",
                            panic_message(&*panic),
                            error
                        ));
                    }
                }
                if total == 0 {
                    self.reporter
                        .error(&format!("Error loading component definitions: {}", error));
                }
            }
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
