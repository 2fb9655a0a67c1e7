pub mod config;
pub mod error;
pub mod loader;
pub mod registry;
pub mod transport;
pub mod uri;

pub use config::{ContextParameter, LoaderConfig, UriBudget, BASE_PATH};
pub use error::{LoadError, LoadResult, TransportError, UNKNOWN_ERROR_MESSAGE_PREFIX};
pub use loader::{CallbackScope, DefinitionLoader, LoadCallback};
pub use registry::{DefinitionCache, DefinitionRegistry};
pub use transport::{LoaderErrorTable, MockTransport, Transport};
pub use uri::{
    descriptors_from_uri, hash_uids, DefinitionRequests, PlannedUri, TrustBucket, UriPlanner,
    DESCRIPTOR_PARAM, UID_DEFAULT, UID_PARAM,
};
