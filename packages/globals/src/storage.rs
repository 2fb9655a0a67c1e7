//! Persistent key/value store boundary for global values.

use crate::error::StorageError;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

pub trait PersistentStore {
    /// Loads and deserializes the value stored under `key`
    fn get(&self, key: &str) -> LocalBoxFuture<'static, Result<Option<serde_json::Value>, StorageError>>;

    fn set(&self, key: &str, value: serde_json::Value) -> LocalBoxFuture<'static, Result<(), StorageError>>;
}

#[derive(Default)]
struct MemoryState {
    entries: RefCell<HashMap<String, serde_json::Value>>,
    fail_get: Cell<bool>,
    fail_set: Cell<bool>,
    reads: Cell<usize>,
    writes: Cell<usize>,
}

/// In-memory store. Clones share the same entries, so two registries built
/// over clones of one store behave like two tabs over one database.
///
/// Every operation yields once before touching the entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Rc<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: serde_json::Value) -> Self {
        let store = Self::new();
        store.insert(key, value);
        store
    }

    pub fn insert(&self, key: &str, value: serde_json::Value) {
        self.state.entries.borrow_mut().insert(key.to_string(), value);
    }

    pub fn entry(&self, key: &str) -> Option<serde_json::Value> {
        self.state.entries.borrow().get(key).cloned()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.fail_get.set(fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_set.set(fail);
    }

    pub fn reads(&self) -> usize {
        self.state.reads.get()
    }

    pub fn writes(&self) -> usize {
        self.state.writes.get()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> LocalBoxFuture<'static, Result<Option<serde_json::Value>, StorageError>> {
        let state = self.state.clone();
        let key = key.to_string();
        async move {
            tokio::task::yield_now().await;
            state.reads.set(state.reads.get() + 1);
            if state.fail_get.get() {
                return Err(StorageError::Failed(format!("read of '{}' failed", key)));
            }
            debug!(key = %key, "memory store read");
            Ok(state.entries.borrow().get(&key).cloned())
        }
        .boxed_local()
    }

    fn set(&self, key: &str, value: serde_json::Value) -> LocalBoxFuture<'static, Result<(), StorageError>> {
        let state = self.state.clone();
        let key = key.to_string();
        async move {
            tokio::task::yield_now().await;
            if state.fail_set.get() {
                return Err(StorageError::Failed(format!("write of '{}' failed", key)));
            }
            state.writes.set(state.writes.get() + 1);
            debug!(key = %key, "memory store write");
            state.entries.borrow_mut().insert(key, value);
            Ok(())
        }
        .boxed_local()
    }
}
