//! Resource-level role gate.
//!
//! The grant table maps a role name to the resources it may touch and the
//! actions allowed on each. It is loaded once from configuration and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{AuthzError, Result};
use crate::types::{Action, Principal};

/// Immutable `role -> resource -> actions` table.
///
/// ```yaml
/// anonymous:
///   notes: [read]
/// user:
///   notes: [create, read, update, delete]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantTable {
    grants: HashMap<String, HashMap<String, BTreeSet<Action>>>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a grant table from YAML.
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|e| AuthzError::GrantTableParse(e.to_string()))
    }

    /// Adds actions for a role on a resource. Used while the table is built.
    pub fn with_grant(
        mut self,
        role: impl Into<String>,
        resource: impl Into<String>,
        actions: impl IntoIterator<Item = Action>,
    ) -> Self {
        self.grants
            .entry(role.into())
            .or_default()
            .entry(resource.into())
            .or_default()
            .extend(actions);
        self
    }

    /// Whether `role` has `action` on `resource`.
    pub fn grants(&self, role: &str, resource: &str, action: Action) -> bool {
        self.grants
            .get(role)
            .and_then(|resources| resources.get(resource))
            .is_some_and(|actions| actions.contains(&action))
    }

    /// Role names present in the table.
    pub fn roles(&self) -> impl Iterator<Item = &str> + '_ {
        self.grants.keys().map(String::as_str)
    }

    /// Resource names granted to any role.
    pub fn resources(&self) -> BTreeSet<&str> {
        self.grants
            .values()
            .flat_map(|resources| resources.keys().map(String::as_str))
            .collect()
    }
}

/// Coarse per-resource check run before any record-level filtering.
#[derive(Debug, Clone)]
pub struct RoleGate {
    table: GrantTable,
}

impl RoleGate {
    pub fn new(table: GrantTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &GrantTable {
        &self.table
    }

    /// True when any of the principal's roles grants `action` on `resource`.
    pub fn allowed(&self, principal: &Principal, resource: &str, action: Action) -> bool {
        let allowed = principal
            .role_names()
            .any(|role| self.table.grants(role, resource, action));

        debug!(
            "Role gate: {} {} on {} -> {}",
            principal.identity(),
            action,
            resource,
            if allowed { "allow" } else { "deny" }
        );

        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, ANONYMOUS_ROLE};

    fn table() -> GrantTable {
        GrantTable::new()
            .with_grant(ANONYMOUS_ROLE, "notes", [Action::Read])
            .with_grant("user", "notes", Action::ALL)
            .with_grant("admin", "users", [Action::Read, Action::Delete])
    }

    #[test]
    fn test_anonymous_gate() {
        let gate = RoleGate::new(table());
        let anonymous = Principal::anonymous(Role::new(1, ANONYMOUS_ROLE));

        assert!(gate.allowed(&anonymous, "notes", Action::Read));
        assert!(!gate.allowed(&anonymous, "notes", Action::Create));
        assert!(!gate.allowed(&anonymous, "users", Action::Read));
    }

    #[test]
    fn test_any_role_grants() {
        let gate = RoleGate::new(table());
        let principal = Principal::user(5, vec![Role::new(2, "user"), Role::new(3, "admin")]);

        assert!(gate.allowed(&principal, "notes", Action::Delete));
        assert!(gate.allowed(&principal, "users", Action::Delete));
        assert!(!gate.allowed(&principal, "users", Action::Update));
    }

    #[test]
    fn test_unknown_resource_denied() {
        let gate = RoleGate::new(table());
        let principal = Principal::user(5, vec![Role::new(2, "user")]);
        assert!(!gate.allowed(&principal, "invoices", Action::Read));
    }

    #[test]
    fn test_resources_listed_once() {
        let table = GrantTable::new()
            .with_grant("user", "note", [Action::Read])
            .with_grant("admin", "note", [Action::Delete])
            .with_grant("admin", "page", [Action::Read]);
        assert_eq!(table.resources().into_iter().collect::<Vec<_>>(), vec!["note", "page"]);
    }

    #[test]
    fn test_grant_table_from_yaml() {
        let parsed = GrantTable::from_yaml(
            r#"
anonymous:
  notes: [read]
user:
  notes: [create, read, update, delete]
admin:
  users: [read, delete]
"#,
        )
        .unwrap();
        assert_eq!(parsed, table());
    }

    #[test]
    fn test_grant_table_rejects_unknown_action() {
        let err = GrantTable::from_yaml("user:\n  notes: [publish]\n").unwrap_err();
        assert!(matches!(err, AuthzError::GrantTableParse(_)));
    }
}
