use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const BASE_PATH: &str = "/auraCmpDef?";

/// URI length limit for legacy engines
pub const LEGACY_URI_LIMIT: usize = 1800;

/// Request header limit commonly configured on app servers and proxies
pub const STANDARD_HEADER_LIMIT: usize = 8000;

/// How long the descriptor part of a fetch URI may grow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UriBudget {
    Legacy,
    /// The header limit minus headers that travel with every request
    #[serde(rename_all = "camelCase")]
    Standard {
        cookie_length: usize,
        user_agent_length: usize,
    },
    /// Explicit limit, mostly for tests and tooling
    #[serde(rename_all = "camelCase")]
    Fixed { max_length: usize },
}

impl Default for UriBudget {
    fn default() -> Self {
        UriBudget::Standard {
            cookie_length: 0,
            user_agent_length: 0,
        }
    }
}

impl UriBudget {
    pub fn max_length(&self) -> usize {
        match self {
            UriBudget::Legacy => LEGACY_URI_LIMIT,
            UriBudget::Standard {
                cookie_length,
                user_agent_length,
            } => STANDARD_HEADER_LIMIT.saturating_sub(cookie_length + user_agent_length),
            UriBudget::Fixed { max_length } => *max_length,
        }
    }
}

/// `name=value` pair sent with every definition request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextParameter {
    pub name: String,
    pub value: String,
}

impl ContextParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Definition loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderConfig {
    /// Primary (trusted) host, prepended to every URI
    pub host: String,
    /// Low-trust delivery host for cacheable, internally trusted definitions
    pub cdn_host: Option<String>,
    pub base_path: String,
    pub context_parameters: Vec<ContextParameter>,
    pub internal_namespaces: BTreeSet<String>,
    pub uri_budget: UriBudget,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            cdn_host: None,
            base_path: BASE_PATH.to_string(),
            context_parameters: Vec::new(),
            internal_namespaces: BTreeSet::new(),
            uri_budget: UriBudget::default(),
        }
    }
}

impl LoaderConfig {
    pub fn is_internal_namespace(&self, namespace: &str) -> bool {
        self.internal_namespaces.contains(namespace)
    }

    /// Base path plus the `name=value&...` context query
    pub fn query_prefix(&self) -> String {
        let params: Vec<String> = self
            .context_parameters
            .iter()
            .map(|p| format!("{}={}", p.name, p.value))
            .collect();
        format!("{}{}", self.base_path, params.join("&"))
    }
}
