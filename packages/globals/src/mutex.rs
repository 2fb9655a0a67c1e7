//! Named mutex coordinating writers that share one persistent store.

use futures::future::{FutureExt, LocalBoxFuture};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub trait NamedMutex {
    /// Resolves once the lock named `name` is held. Dropping the guard unlocks.
    fn lock(&self, name: &str) -> LocalBoxFuture<'static, LockGuard>;
}

/// Held lock. Whatever the mutex implementation needs to keep alive while
/// the lock is held lives in `_release`.
pub struct LockGuard {
    name: String,
    _release: Box<dyn Any>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, release: impl Any) -> Self {
        Self {
            name: name.into(),
            _release: Box::new(release),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(name = %self.name, "mutex released");
    }
}

/// Process-local named mutex. Share one instance (behind an `Rc`) between
/// every writer that must be serialized.
#[derive(Default)]
pub struct LocalMutex {
    locks: RefCell<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalMutex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamedMutex for LocalMutex {
    fn lock(&self, name: &str) -> LocalBoxFuture<'static, LockGuard> {
        let mutex = self
            .locks
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .clone();
        let name = name.to_string();
        async move {
            let held = mutex.lock_owned().await;
            debug!(name = %name, "mutex acquired");
            LockGuard::new(name, held)
        }
        .boxed_local()
    }
}
