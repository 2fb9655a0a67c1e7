use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STORAGE_KEY: &str = "globalValueProviders";
pub const MUTEX_KEY: &str = "GlobalValueProviders";

/// Global value registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalsConfig {
    /// Write merged values through to the persistent store, when one is given
    pub persistent: bool,
    pub storage_key: String,
    pub mutex_key: String,
    /// Initial values per provider type (`$Label`, `$Locale`, custom types...)
    pub bootstrap: BTreeMap<String, serde_json::Value>,
}

impl Default for GlobalsConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            storage_key: STORAGE_KEY.to_string(),
            mutex_key: MUTEX_KEY.to_string(),
            bootstrap: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GlobalsConfig = serde_json::from_value(json!({
            "persistent": false,
            "bootstrap": {"$Locale": {"lang": "fr"}}
        }))
        .unwrap();

        assert!(!config.persistent);
        assert_eq!(config.storage_key, STORAGE_KEY);
        assert_eq!(config.mutex_key, MUTEX_KEY);
        assert_eq!(config.bootstrap["$Locale"], json!({"lang": "fr"}));
    }
}
