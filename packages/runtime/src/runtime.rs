//! # Runtime
//!
//! ## Purpose
//!
//! Explicit context object tying the runtime services together: one
//! expression service, the global value registry installed as its global
//! provider, the definition loader with its cache, and the component
//! registry installed as its notifier. Everything is built from a
//! [`RuntimeConfig`] plus injected collaborators; nothing is process-global.
//!
//! Single-threaded: the loader and iterations dispatch with `spawn_local`,
//! so a runtime is driven from inside a `tokio::task::LocalSet`.

use crate::components::{ComponentConfig, ComponentRegistry, RegistryHost};
use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::templates::TemplateFactory;
use futures::channel::oneshot;
use std::rc::Rc;
use tracing::{info, instrument};
use trellis_attributes::{AccessControl, AllowAll, SetOutcome};
use trellis_common::{ComponentId, DefDescriptor, ErrorReporter, TracingReporter, Value};
use trellis_expression::{ExpressionService, Locator, ProviderLookup};
use trellis_globals::{
    AbsenceSentinel, GlobalEntry, GlobalValueRegistry, NamedMutex, PersistOutcome, PersistentStore,
};
use trellis_iteration::Iteration;
use trellis_loader::{
    CallbackScope, DefinitionLoader, DefinitionRegistry, LoadError, LoaderErrorTable, Transport,
};

pub struct Runtime {
    config: RuntimeConfig,
    expressions: Rc<ExpressionService>,
    globals: Rc<GlobalValueRegistry>,
    definitions: Rc<DefinitionRegistry>,
    loader: Rc<DefinitionLoader>,
    components: Rc<ComponentRegistry>,
    reporter: Rc<dyn ErrorReporter>,
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    transport: Option<Rc<dyn Transport>>,
    definitions: Option<Rc<DefinitionRegistry>>,
    error_table: Option<Rc<LoaderErrorTable>>,
    storage: Option<Rc<dyn PersistentStore>>,
    mutex: Option<Rc<dyn NamedMutex>>,
    sentinel: Option<Rc<dyn AbsenceSentinel>>,
    access: Option<Rc<dyn AccessControl>>,
    reporter: Option<Rc<dyn ErrorReporter>>,
}

impl RuntimeBuilder {
    pub fn transport(mut self, transport: Rc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Definition cache shared with the transport that fills it
    pub fn definitions(mut self, definitions: Rc<DefinitionRegistry>) -> Self {
        self.definitions = Some(definitions);
        self
    }

    pub fn error_table(mut self, error_table: Rc<LoaderErrorTable>) -> Self {
        self.error_table = Some(error_table);
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

    pub fn access(mut self, access: Rc<dyn AccessControl>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> RuntimeResult<Runtime> {
        let transport = self
            .transport
            .ok_or(RuntimeError::MissingCollaborator("transport"))?;
        let reporter = self
            .reporter
            .unwrap_or_else(|| Rc::new(TracingReporter));
        let config = self.config;

        let expressions = Rc::new(ExpressionService::new(config.diagnostics));

        let mut globals = GlobalValueRegistry::builder(expressions.clone())
            .config(config.globals.clone())
            .reporter(reporter.clone());
        if let Some(storage) = self.storage {
            globals = globals.storage(storage);
        }
        if let Some(mutex) = self.mutex {
            globals = globals.mutex(mutex);
        }
        if let Some(sentinel) = self.sentinel {
            globals = globals.sentinel(sentinel);
        }
        let globals = globals.build();

        let definitions = self.definitions.unwrap_or_default();
        let loader = Rc::new(
            DefinitionLoader::new(
                config.loader.clone(),
                transport,
                definitions.clone(),
                self.error_table.unwrap_or_default(),
            )
            .with_reporter(reporter.clone()),
        );

        let components = ComponentRegistry::new(
            expressions.clone(),
            self.access.unwrap_or_else(|| Rc::new(AllowAll)),
            config.access,
            reporter.clone(),
        );

        info!(
            diagnostics = config.diagnostics,
            access_checks = config.access.enable_access_checks,
            persistent_globals = config.globals.persistent,
            "runtime ready"
        );

        Ok(Runtime {
            config,
            expressions,
            globals,
            definitions,
            loader,
            components,
            reporter,
        })
    }
}

impl Runtime {
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            transport: None,
            definitions: None,
            error_table: None,
            storage: None,
            mutex: None,
            sentinel: None,
            access: None,
            reporter: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn expressions(&self) -> &Rc<ExpressionService> {
        &self.expressions
    }

    pub fn globals(&self) -> &Rc<GlobalValueRegistry> {
        &self.globals
    }

    pub fn definitions(&self) -> &Rc<DefinitionRegistry> {
        &self.definitions
    }

    pub fn loader(&self) -> &Rc<DefinitionLoader> {
        &self.loader
    }

    pub fn components(&self) -> &Rc<ComponentRegistry> {
        &self.components
    }

    /// Loads persisted global values. Returns whether anything was loaded.
    #[instrument(skip(self))]
    pub async fn start(&self) -> bool {
        self.globals.load_from_storage().await
    }

    pub fn create_component(&self, config: ComponentConfig) -> RuntimeResult<ComponentId> {
        self.components.create_component(config)
    }

    /// Creates an iteration component. Call [`Iteration::init`] to build its
    /// first body; later changes of its range attributes rebuild it.
    pub fn create_iteration(&self, config: ComponentConfig) -> RuntimeResult<Rc<Iteration>> {
        let id = self.components.create_component(config)?;
        let attributes = self
            .components
            .attributes(id)
            .ok_or(RuntimeError::UnknownComponent(id))?;

        let factory = Rc::new(TemplateFactory::new(
            Rc::downgrade(&self.components),
            self.loader.clone(),
            self.definitions.clone(),
            id,
        ));
        let host = Rc::new(RegistryHost::new(Rc::downgrade(&self.components)));

        let mut iteration =
            Iteration::new(id, attributes, factory, host).with_reporter(self.reporter.clone());
        if let Some(owner) = self.components.owner_of(id) {
            iteration = iteration.with_owner(owner);
        }
        if let Some(provider) = self.components.provider_for(id) {
            iteration = iteration.with_template_provider(provider);
        }

        let iteration = Rc::new(iteration);
        self.components.register_iteration(id, iteration.clone());
        Ok(iteration)
    }

    pub fn get_attribute(&self, id: ComponentId, path: &str) -> RuntimeResult<Value> {
        self.components.get_attribute(id, path)
    }

    pub fn set_attribute(&self, id: ComponentId, path: &str, value: Value) -> RuntimeResult<SetOutcome> {
        self.components.set_attribute(id, path, value)
    }

    pub fn destroy(&self, id: ComponentId) -> bool {
        self.components.destroy_component(id)
    }

    /// Locator of `root` as seen from `parent`
    pub fn resolve_locator(&self, parent: ComponentId, root: ComponentId, include_metadata: bool) -> Option<Locator> {
        self.expressions
            .resolve_locator(&*self.components, parent, root, include_metadata, None)
    }

    /// `$Provider.path` lookup
    pub fn get_global(&self, expression: &str) -> RuntimeResult<Value> {
        Ok(self.globals.get(expression)?)
    }

    pub async fn merge_globals(&self, entries: Vec<GlobalEntry>) -> PersistOutcome {
        self.globals.merge(entries, false).await
    }

    /// Loads definitions through the batching loader and waits for the batch
    pub async fn load_definitions(
        &self,
        requests: Vec<(DefDescriptor, Option<String>)>,
    ) -> RuntimeResult<CallbackScope> {
        let (sender, receiver) = oneshot::channel();
        self.loader.load_component_defs(requests, move |result| {
            let _ = sender.send(result);
        });
        Ok(receiver.await.unwrap_or(Err(LoadError::Abandoned))?)
    }
}
