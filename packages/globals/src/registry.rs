//! # Global Value Registry
//!
//! ## Purpose
//!
//! Owns every global value provider (`$Browser`, `$Label`, `$Locale`,
//! `$Global` and any registered later), merges new values into them, fans
//! each merge out to the expression service and writes the result through to
//! a persistent store shared with other writers.
//!
//! ## Persistence
//!
//! A persisting merge runs load, merge and save under a named mutex so that a
//! concurrent writer's values are merged instead of overwritten. While one
//! persist is waiting for the lock, further merges only update memory; the
//! waiting persist picks their values up when it collects the providers.
//! Storage failures never reach the caller. A failed save sets the absence
//! sentinel, which stops [`load_from_storage`](GlobalValueRegistry::load_from_storage)
//! until a later save succeeds.

use crate::config::GlobalsConfig;
use crate::error::{GlobalsError, GlobalsResult};
use crate::mutex::{LocalMutex, NamedMutex};
use crate::provider::{GlobalValueProvider, LabelValueProvider, ObjectValueProvider};
use crate::sentinel::{AbsenceSentinel, MemorySentinel};
use crate::storage::PersistentStore;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, instrument, warn};
use trellis_common::{split_path, ErrorReporter, TracingReporter, Value, ValueProvider};
use trellis_expression::{normalize, ExpressionService};

pub const BROWSER: &str = "$Browser";
pub const LABEL: &str = "$Label";
pub const LOCALE: &str = "$Locale";
pub const GLOBAL: &str = "$Global";

pub const DEFAULT_PROVIDERS: [&str; 4] = [BROWSER, LABEL, LOCALE, GLOBAL];

/// One provider's worth of values, as merged and as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntry {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub values: serde_json::Value,
}

impl GlobalEntry {
    pub fn new(provider_type: impl Into<String>, values: serde_json::Value) -> Self {
        Self {
            provider_type: provider_type.into(),
            values,
        }
    }
}

/// What a merge did about persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// `skip_persist`, no store, or persistence disabled
    Skipped,
    /// A persist already waiting for the lock will carry this merge
    Coalesced,
    /// Saved. `degraded` means the stored snapshot could not be loaded or
    /// merged and was overwritten with in-memory values.
    Persisted { degraded: bool },
    /// The save failed; the absence sentinel is set
    Failed,
}

#[derive(Debug)]
struct PersistError {
    action: &'static str,
    message: String,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.message)
    }
}

fn summarize(errors: &[PersistError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

pub struct GlobalValueRegistry {
    providers: RefCell<BTreeMap<String, Box<dyn GlobalValueProvider>>>,
    expressions: Rc<ExpressionService>,
    storage: Option<Rc<dyn PersistentStore>>,
    mutex: Rc<dyn NamedMutex>,
    sentinel: Rc<dyn AbsenceSentinel>,
    reporter: Rc<dyn ErrorReporter>,
    storage_key: String,
    mutex_key: String,
    persistence_queued: Cell<bool>,
    loaded_from_storage: Cell<bool>,
}

pub struct GlobalValueRegistryBuilder {
    expressions: Rc<ExpressionService>,
    config: GlobalsConfig,
    storage: Option<Rc<dyn PersistentStore>>,
    mutex: Option<Rc<dyn NamedMutex>>,
    sentinel: Option<Rc<dyn AbsenceSentinel>>,
    reporter: Option<Rc<dyn ErrorReporter>>,
    providers: Vec<(String, Box<dyn GlobalValueProvider>)>,
}

impl GlobalValueRegistryBuilder {
    pub fn config(mut self, config: GlobalsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: Rc<dyn PersistentStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn mutex(mut self, mutex: Rc<dyn NamedMutex>) -> Self {
        self.mutex = Some(mutex);
        self
    }

    pub fn sentinel(mut self, sentinel: Rc<dyn AbsenceSentinel>) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    pub fn reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn provider(mut self, provider_type: impl Into<String>, provider: Box<dyn GlobalValueProvider>) -> Self {
        self.providers.push((provider_type.into(), provider));
        self
    }

    /// Creates the registry and installs it as the expression service's
    /// global provider. Bootstrap values for the default providers seed them
    /// directly; bootstrap values for other types are merged without
    /// persisting.
    pub fn build(self) -> Rc<GlobalValueRegistry> {
        let reporter = self.reporter.unwrap_or_else(|| Rc::new(TracingReporter));
        let storage = if self.config.persistent { self.storage } else { None };

        let registry = Rc::new(GlobalValueRegistry {
            providers: RefCell::new(BTreeMap::new()),
            expressions: self.expressions,
            storage,
            mutex: self.mutex.unwrap_or_else(|| Rc::new(LocalMutex::new())),
            sentinel: self.sentinel.unwrap_or_else(|| Rc::new(MemorySentinel::default())),
            reporter,
            storage_key: self.config.storage_key,
            mutex_key: self.config.mutex_key,
            persistence_queued: Cell::new(false),
            loaded_from_storage: Cell::new(false),
        });

        let bootstrap = self.config.bootstrap;
        for key in DEFAULT_PROVIDERS {
            let mut provider: Box<dyn GlobalValueProvider> = if key == LABEL {
                Box::new(LabelValueProvider::new())
            } else {
                Box::new(ObjectValueProvider::new(key))
            };
            if let Some(values) = bootstrap.get(key) {
                if let Err(e) = provider.merge(values) {
                    registry.reporter.warning(&e.to_string());
                }
            }
            registry.providers.borrow_mut().insert(key.to_string(), provider);
        }
        for (provider_type, provider) in self.providers {
            registry.add_value_provider(provider_type, provider);
        }

        let provider: Rc<dyn ValueProvider> = registry.clone();
        registry.expressions.set_global_provider(Rc::downgrade(&provider));

        let entries: Vec<GlobalEntry> = bootstrap
            .into_iter()
            .filter(|(key, _)| !DEFAULT_PROVIDERS.contains(&key.as_str()))
            .map(|(key, values)| GlobalEntry::new(key, values))
            .collect();
        registry.apply(&entries);

        registry
    }
}

impl GlobalValueRegistry {
    pub fn builder(expressions: Rc<ExpressionService>) -> GlobalValueRegistryBuilder {
        GlobalValueRegistryBuilder {
            expressions,
            config: GlobalsConfig::default(),
            storage: None,
            mutex: None,
            sentinel: None,
            reporter: None,
            providers: Vec::new(),
        }
    }

    /// Registers `provider` under `provider_type` unless the type is taken.
    /// Returns whether it was registered.
    pub fn add_value_provider(&self, provider_type: impl Into<String>, provider: Box<dyn GlobalValueProvider>) -> bool {
        let provider_type = provider_type.into();
        let mut providers = self.providers.borrow_mut();
        if providers.contains_key(&provider_type) {
            debug!(provider = %provider_type, "value provider already registered");
            return false;
        }
        providers.insert(provider_type, provider);
        true
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.providers.borrow().contains_key(provider_type)
    }

    pub fn provider_types(&self) -> Vec<String> {
        self.providers.borrow().keys().cloned().collect()
    }

    pub fn provider_values(&self, provider_type: &str) -> Option<Value> {
        self.providers.borrow().get(provider_type).map(|p| p.values())
    }

    pub fn loaded_from_persistent_storage(&self) -> bool {
        self.loaded_from_storage.get()
    }

    /// Merges `entries` into their providers (creating plain object
    /// providers for unknown types) and persists unless `skip_persist`.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn merge(&self, entries: Vec<GlobalEntry>, skip_persist: bool) -> PersistOutcome {
        self.apply(&entries);
        if skip_persist {
            return PersistOutcome::Skipped;
        }
        self.persist(&entries).await
    }

    /// In-memory half of a merge. Returns the number of consumer
    /// expressions notified.
    pub fn apply(&self, entries: &[GlobalEntry]) -> usize {
        let mut notified = 0;
        for entry in entries {
            let merged = {
                let mut providers = self.providers.borrow_mut();
                providers
                    .entry(entry.provider_type.clone())
                    .or_insert_with(|| Box::new(ObjectValueProvider::new(entry.provider_type.as_str())))
                    .merge(&entry.values)
            };
            if let Err(e) = merged {
                self.reporter.error(&e.to_string());
                continue;
            }
            notified += self
                .expressions
                .update_global_references(&entry.provider_type, &Value::from_json(&entry.values));
        }
        notified
    }

    /// Current values of every storable provider
    pub fn storable_entries(&self) -> Vec<GlobalEntry> {
        self.providers
            .borrow()
            .iter()
            .filter(|(_, provider)| provider.is_storable())
            .map(|(provider_type, provider)| GlobalEntry::new(provider_type.clone(), provider.storable_values()))
            .collect()
    }

    async fn persist(&self, entries: &[GlobalEntry]) -> PersistOutcome {
        let Some(storage) = self.storage.clone() else {
            return PersistOutcome::Skipped;
        };
        if self.persistence_queued.get() {
            debug!("persistence already queued");
            return PersistOutcome::Coalesced;
        }
        self.persistence_queued.set(true);

        let _lock = self.mutex.lock(&self.mutex_key).await;
        let mut errors = Vec::new();

        let stored = match storage.get(&self.storage_key).await {
            Ok(stored) => stored,
            Err(e) => {
                let message = "Failed to load global values from storage, will overwrite storage with in-memory values.";
                self.reporter.warning(&format!("{} {}", message, e));
                errors.push(PersistError {
                    action: "load",
                    message: e.to_string(),
                });
                None
            }
        };

        // Collected after the lock so merges made while waiting are included
        self.persistence_queued.set(false);
        let in_memory = self.storable_entries();

        let snapshot = match stored {
            Some(stored) => match merge_snapshot(stored, &in_memory) {
                Ok(merged) => merged,
                Err(e) => {
                    let message = "Merging global values from storage failed, overwriting with in-memory values.";
                    self.reporter.warning(&format!("{} {}", message, e));
                    errors.push(PersistError {
                        action: "merge",
                        message: e.to_string(),
                    });
                    entries_to_json(&in_memory)
                }
            },
            None => entries_to_json(&in_memory),
        };

        match storage.set(&self.storage_key, snapshot).await {
            Ok(()) => {
                if self.sentinel.is_set() {
                    self.sentinel.clear();
                }
                let degraded = !errors.is_empty();
                if degraded {
                    warn!(errors = %summarize(&errors), "global values in storage have been overwritten with in-memory values");
                } else {
                    info!(key = %self.storage_key, "global values persisted");
                }
                PersistOutcome::Persisted { degraded }
            }
            Err(e) => {
                self.sentinel.set();
                let dropped_labels: Vec<String> = entries
                    .iter()
                    .find(|entry| entry.provider_type == LABEL)
                    .and_then(|entry| entry.values.as_object())
                    .map(|sections| sections.keys().cloned().collect())
                    .unwrap_or_default();
                errors.push(PersistError {
                    action: "save",
                    message: e.to_string(),
                });
                warn!(errors = %summarize(&errors), ?dropped_labels, "failed to store merged global values");
                self.reporter
                    .warning(&format!("Failed to store merged global values to storage. {}", e));
                PersistOutcome::Failed
            }
        }
    }

    /// Merges the stored snapshot into memory without writing it back.
    /// Returns whether anything was loaded.
    #[instrument(skip(self))]
    pub async fn load_from_storage(&self) -> bool {
        let Some(storage) = self.storage.clone() else {
            return false;
        };
        if self.sentinel.is_set() {
            debug!("stored global values may be absent, skipping load");
            return false;
        }

        let snapshot = match storage.get(&self.storage_key).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(e) => {
                debug!(error = %e, "loading global values failed");
                return false;
            }
        };
        match serde_json::from_value::<Vec<GlobalEntry>>(snapshot) {
            Ok(entries) => {
                self.apply(&entries);
                self.loaded_from_storage.set(true);
                true
            }
            Err(e) => {
                debug!(error = %e, "stored global values are malformed");
                false
            }
        }
    }

    /// Resolves `$Provider.path`. The provider's own lookup wins; otherwise
    /// the path is resolved against the provider's values.
    pub fn get(&self, expression: &str) -> GlobalsResult<Value> {
        let normalized = normalize(expression);
        let segments = split_path(&normalized);
        let Some((provider_type, path)) = segments.split_first() else {
            return Err(GlobalsError::UnknownProvider {
                provider: normalized.clone(),
            });
        };

        let values = {
            let providers = self.providers.borrow();
            let provider = providers
                .get(*provider_type)
                .ok_or_else(|| GlobalsError::UnknownProvider {
                    provider: provider_type.to_string(),
                })?;
            if let Some(value) = provider.get(path) {
                return Ok(value);
            }
            provider.values()
        };
        Ok(self.expressions.resolve(path, &values, false)?)
    }

    /// [`get`](Self::get), then hands the value to `callback`
    pub fn get_with(&self, expression: &str, callback: impl FnOnce(&Value)) -> GlobalsResult<Value> {
        let value = self.get(expression)?;
        callback(&value);
        Ok(value)
    }
}

impl ValueProvider for GlobalValueRegistry {
    fn get_value(&self, expression: &str) -> Value {
        self.get(expression).unwrap_or_default()
    }

    fn set_value(&self, expression: &str, value: Value) -> bool {
        let normalized = normalize(expression);
        let segments = split_path(&normalized);
        let Some((provider_type, path)) = segments.split_first() else {
            return false;
        };
        let old = self.get_value(&normalized);
        let written = {
            let mut providers = self.providers.borrow_mut();
            match providers.get_mut(*provider_type) {
                Some(provider) => provider.set(path, value.clone()),
                None => false,
            }
        };
        if written {
            self.expressions.update_global_reference(&normalized, &old, &value);
        }
        written
    }
}

fn entries_to_json(entries: &[GlobalEntry]) -> serde_json::Value {
    serde_json::Value::Array(
        entries
            .iter()
            .map(|entry| serde_json::json!({"type": entry.provider_type, "values": entry.values}))
            .collect(),
    )
}

/// Deep-merges the in-memory entries into the stored snapshot, keeping
/// stored values no in-memory provider knows about.
fn merge_snapshot(stored: serde_json::Value, in_memory: &[GlobalEntry]) -> GlobalsResult<serde_json::Value> {
    let mut snapshot: Vec<GlobalEntry> =
        serde_json::from_value(stored).map_err(|e| GlobalsError::CorruptSnapshot(e.to_string()))?;

    for entry in in_memory {
        match snapshot.iter_mut().find(|s| s.provider_type == entry.provider_type) {
            Some(existing) => deep_apply(&mut existing.values, &entry.values),
            None => {
                let mut values = serde_json::Value::Object(serde_json::Map::new());
                deep_apply(&mut values, &entry.values);
                snapshot.push(GlobalEntry::new(entry.provider_type.clone(), values));
            }
        }
    }
    Ok(entries_to_json(&snapshot))
}

fn deep_apply(target: &mut serde_json::Value, source: &serde_json::Value) {
    match (target, source) {
        (serde_json::Value::Object(target), serde_json::Value::Object(source)) => {
            for (key, value) in source {
                let nested = value.is_object() && target.get(key).is_some_and(|e| e.is_object());
                match target.get_mut(key) {
                    Some(existing) if nested => deep_apply(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}
