//! Transport boundary: fetch a URI and execute what it returns.
//!
//! Executing a response registers definitions as a side effect. Servers may
//! also report per-request errors in-band; those land in the
//! [`LoaderErrorTable`] under the request's error key.

use crate::error::TransportError;
use crate::registry::DefinitionRegistry;
use crate::uri::descriptors_from_uri;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

pub trait Transport {
    fn fetch_and_execute(&self, uri: &str) -> LocalBoxFuture<'static, Result<(), TransportError>>;
}

/// In-band errors reported by the server, keyed by request fragment
#[derive(Debug, Default)]
pub struct LoaderErrorTable {
    errors: RefCell<HashMap<String, Vec<String>>>,
}

impl LoaderErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: impl Into<String>, message: impl Into<String>) {
        self.errors
            .borrow_mut()
            .entry(key.into())
            .or_default()
            .push(message.into());
    }

    /// Removes and returns the latest error recorded for `key`
    pub fn take(&self, key: &str) -> Option<String> {
        self.errors.borrow_mut().get_mut(key).and_then(Vec::pop)
    }
}

/// Mock transport for testing. Successful fetches register every descriptor
/// named in the URI with `registry`.
#[derive(Default)]
pub struct MockTransport {
    registry: Rc<DefinitionRegistry>,
    requests: RefCell<Vec<String>>,
    failures: RefCell<Vec<String>>,
    in_band: RefCell<Vec<(String, String, String)>>,
    errors: Option<Rc<LoaderErrorTable>>,
    latency: Cell<usize>,
}

impl MockTransport {
    pub fn new(registry: Rc<DefinitionRegistry>) -> Self {
        Self {
            registry,
            ..Default::default()
        }
    }

    pub fn with_error_table(mut self, errors: Rc<LoaderErrorTable>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Fetches of URIs containing `fragment` fail at the network level
    pub fn fail_when(&self, fragment: impl Into<String>) {
        self.failures.borrow_mut().push(fragment.into());
    }

    /// Fetches of URIs containing `fragment` succeed but report `message`
    /// in-band under `key`
    pub fn report_when(&self, fragment: impl Into<String>, key: impl Into<String>, message: impl Into<String>) {
        self.in_band
            .borrow_mut()
            .push((fragment.into(), key.into(), message.into()));
    }

    /// Number of scheduler turns each fetch takes (at least one)
    pub fn set_latency(&self, turns: usize) {
        self.latency.set(turns);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn fetch_and_execute(&self, uri: &str) -> LocalBoxFuture<'static, Result<(), TransportError>> {
        self.requests.borrow_mut().push(uri.to_string());

        let fails = self.failures.borrow().iter().any(|f| uri.contains(f.as_str()));
        let reported: Vec<(String, String)> = self
            .in_band
            .borrow()
            .iter()
            .filter(|(fragment, _, _)| uri.contains(fragment.as_str()))
            .map(|(_, key, message)| (key.clone(), message.clone()))
            .collect();
        let registry = self.registry.clone();
        let errors = self.errors.clone();
        let uri = uri.to_string();
        let turns = self.latency.get().max(1);

        async move {
            for _ in 0..turns {
                tokio::task::yield_now().await;
            }
            if fails {
                debug!(uri = %uri, "mock fetch failed");
                return Err(TransportError(format!("failed to fetch {}", uri)));
            }
            if let Some(errors) = errors {
                for (key, message) in reported {
                    errors.record(key, message);
                }
            }
            for descriptor in descriptors_from_uri(&uri) {
                registry.register(descriptor);
            }
            Ok(())
        }
        .boxed_local()
    }
}
