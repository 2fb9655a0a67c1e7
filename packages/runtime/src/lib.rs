pub mod components;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod templates;

pub use components::{ChangeEvent, ComponentConfig, ComponentRegistry, RegistryHost, VIEW_PROVIDER};
pub use config::{RuntimeConfig, DEFAULT_CONFIG_NAME};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{init_tracing, LOG_ENV};
pub use runtime::{Runtime, RuntimeBuilder};
pub use templates::TemplateFactory;
