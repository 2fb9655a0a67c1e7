pub mod config;
pub mod error;
pub mod mutex;
pub mod provider;
pub mod registry;
pub mod sentinel;
pub mod storage;

#[cfg(test)]
mod tests_registry;

pub use config::{GlobalsConfig, MUTEX_KEY, STORAGE_KEY};
pub use error::{GlobalsError, GlobalsResult, StorageError};
pub use mutex::{LocalMutex, LockGuard, NamedMutex};
pub use provider::{GlobalValueProvider, LabelValueProvider, ObjectValueProvider};
pub use registry::{
    GlobalEntry, GlobalValueRegistry, GlobalValueRegistryBuilder, PersistOutcome, BROWSER,
    DEFAULT_PROVIDERS, GLOBAL, LABEL, LOCALE,
};
pub use sentinel::{AbsenceSentinel, MemorySentinel, DEFAULT_SENTINEL_LIFETIME};
pub use storage::{MemoryStore, PersistentStore};
