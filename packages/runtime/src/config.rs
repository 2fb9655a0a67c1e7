use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trellis_attributes::AccessPolicy;
use trellis_globals::GlobalsConfig;
use trellis_loader::LoaderConfig;

pub const DEFAULT_CONFIG_NAME: &str = "trellis.config.json";

/// Trellis runtime configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Log filter used when `TRELLIS_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Case-sensitivity checks while resolving expressions
    #[serde(default)]
    pub diagnostics: bool,

    #[serde(default)]
    pub access: AccessPolicy,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub globals: GlobalsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            diagnostics: false,
            access: AccessPolicy::default(),
            loader: LoaderConfig::default(),
            globals: GlobalsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load config from a directory
    pub fn load(cwd: impl AsRef<Path>) -> RuntimeResult<Self> {
        let config_path = Self::path_in(cwd);

        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|source| RuntimeError::ConfigRead {
                    path: config_path.clone(),
                    source,
                })?;
            serde_json::from_str(&content).map_err(|source| RuntimeError::ConfigParse {
                path: config_path,
                source,
            })
        } else {
            // Return default config if none exists
            Ok(RuntimeConfig::default())
        }
    }

    pub fn path_in(cwd: impl AsRef<Path>) -> PathBuf {
        cwd.as_ref().join(DEFAULT_CONFIG_NAME)
    }
}
