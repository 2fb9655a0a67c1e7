use crate::def::{AttributeDef, Visibility};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use trellis_common::ComponentId;

/// Capability check consulted on every attribute read and write
pub trait AccessControl {
    /// `def` is `None` for attributes the component does not declare
    fn allow_access(&self, def: Option<&AttributeDef>, target: ComponentId) -> bool;

    /// Describes the current accessor for diagnostics
    fn current_access(&self) -> String {
        "unknown".to_string()
    }
}

/// How access failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessPolicy {
    /// Denied reads and writes fail instead of proceeding with a warning
    pub enable_access_checks: bool,
    pub log_access_failures: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            enable_access_checks: false,
            log_access_failures: true,
        }
    }
}

impl AccessPolicy {
    pub fn strict() -> Self {
        Self {
            enable_access_checks: true,
            log_access_failures: true,
        }
    }
}

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn allow_access(&self, _def: Option<&AttributeDef>, _target: ComponentId) -> bool {
        true
    }
}

/// Visibility-based checks.
///
/// Global and public attributes are always visible. Private attributes are
/// visible only while the owning component itself is the current accessor.
/// Internal attributes are visible when internal access is granted.
#[derive(Debug, Default)]
pub struct VisibilityRules {
    accessor: RefCell<Option<ComponentId>>,
    internal: bool,
}

impl VisibilityRules {
    pub fn new(internal: bool) -> Self {
        Self {
            accessor: RefCell::new(None),
            internal,
        }
    }

    /// Sets the component on whose behalf subsequent accesses are made
    pub fn set_accessor(&self, accessor: Option<ComponentId>) {
        *self.accessor.borrow_mut() = accessor;
    }
}

impl AccessControl for VisibilityRules {
    fn allow_access(&self, def: Option<&AttributeDef>, target: ComponentId) -> bool {
        let Some(def) = def else {
            return true;
        };
        match def.visibility {
            Visibility::Global | Visibility::Public => true,
            Visibility::Private => *self.accessor.borrow() == Some(target),
            Visibility::Internal => self.internal,
        }
    }

    fn current_access(&self) -> String {
        match *self.accessor.borrow() {
            Some(id) => id.to_string(),
            None => "none".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::AttributeType;

    #[test]
    fn test_private_visibility() {
        let rules = VisibilityRules::new(false);
        let def = AttributeDef::new("secret", AttributeType::String).with_visibility(Visibility::Private);
        let owner = ComponentId(1);

        assert!(!rules.allow_access(Some(&def), owner));
        rules.set_accessor(Some(owner));
        assert!(rules.allow_access(Some(&def), owner));
        assert!(!rules.allow_access(Some(&def), ComponentId(2)));
        assert!(rules.allow_access(None, owner));
    }

    #[test]
    fn test_policy_deserializes_camel_case() {
        let policy: AccessPolicy =
            serde_json::from_str(r#"{"enableAccessChecks": true, "logAccessFailures": false}"#).unwrap();
        assert!(policy.enable_access_checks);
        assert!(!policy.log_access_failures);
    }
}
