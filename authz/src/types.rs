//! Core authorization types.
//!
//! # Security Considerations
//!
//! - A [`Principal`] must only be built from an authenticated request or from
//!   the anonymous role. Never trust identity data from request bodies.
//! - The anonymous role is a reserved sentinel. It is never assigned to a user
//!   and is the only role an unauthenticated request carries.
//! - [`Action`] and [`Operation`] are closed sets; unknown names are rejected
//!   when parsed instead of falling through to a default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Primary key of a user in the identity store.
pub type UserId = i64;

/// Name of the reserved role carried by unauthenticated requests.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Primary key of a role in the identity store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub i64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The principal a request runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// No valid credential was presented.
    Anonymous,
    /// A user authenticated through a credential.
    User(UserId),
}

impl Identity {
    /// The user id, or `None` for the anonymous identity.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::User(id) => Some(*id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

impl From<Option<UserId>> for Identity {
    fn from(id: Option<UserId>) -> Self {
        id.map_or(Identity::Anonymous, Identity::User)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => write!(f, "anonymous"),
            Identity::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// A named group of users.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

impl Role {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: RoleId(id),
            name: name.into(),
        }
    }

    /// Whether this is the reserved anonymous role.
    pub fn is_anonymous(&self) -> bool {
        self.name == ANONYMOUS_ROLE
    }
}

/// An identity together with its resolved role set.
///
/// In the "who can do what to which resource" triple, the Principal is the
/// "who". Role resolution happens once per request; every later check reads
/// the resolved set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    identity: Identity,
    roles: BTreeSet<Role>,
}

impl Principal {
    /// Creates a principal for an authenticated user.
    pub fn user(id: UserId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            identity: Identity::User(id),
            roles: roles.into_iter().collect(),
        }
    }

    /// Creates the anonymous principal, which carries only the anonymous role.
    pub fn anonymous(anonymous_role: Role) -> Self {
        Self {
            identity: Identity::Anonymous,
            roles: BTreeSet::from([anonymous_role]),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn role_ids(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.roles.iter().map(|r| r.id)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.roles.iter().map(|r| r.name.as_str())
    }

    /// True when at least one of the principal's role names is in `names`.
    pub fn has_any_role<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> bool {
        names
            .into_iter()
            .any(|name| self.roles.iter().any(|r| &r.name == name))
    }
}

/// An action checked by the role gate.
///
/// Maps one-to-one onto the CRUD verbs of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Maps an HTTP method onto an action:
    /// - POST -> create
    /// - GET, HEAD -> read
    /// - PATCH, PUT -> update
    /// - DELETE -> delete
    pub fn from_method(method: &str) -> Option<Action> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(Action::Create),
            "GET" | "HEAD" => Some(Action::Read),
            "PATCH" | "PUT" => Some(Action::Update),
            "DELETE" => Some(Action::Delete),
            _ => None,
        }
    }

    /// The record-level operation this action narrows to, if any.
    ///
    /// Creation has no existing record to filter, so it maps to `None`.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Action::Create => None,
            Action::Read => Some(Operation::Read),
            Action::Update => Some(Operation::Update),
            Action::Delete => Some(Operation::Delete),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(AuthzError::UnknownAction(other.to_string())),
        }
    }
}

/// A record-level operation, also the permission stored in access-control entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Read, Operation::Update, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(AuthzError::UnknownOperation(other.to_string())),
        }
    }
}

/// A handle on the storage collection a policy filters.
///
/// Only names the columns the policy algebra needs; the storage layer owns
/// everything else about the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub table: String,
    pub id_column: String,
    pub owner_column: String,
}

impl Collection {
    /// A collection using the conventional `id` and `owner_id` columns.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            owner_column: "owner_id".to_string(),
        }
    }

    pub fn with_owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_option() {
        assert_eq!(Identity::from(None), Identity::Anonymous);
        assert_eq!(Identity::from(Some(7)), Identity::User(7));
        assert_eq!(Identity::User(7).user_id(), Some(7));
        assert!(Identity::Anonymous.is_anonymous());
    }

    #[test]
    fn test_anonymous_principal_carries_only_sentinel() {
        let principal = Principal::anonymous(Role::new(1, ANONYMOUS_ROLE));
        assert_eq!(principal.identity(), Identity::Anonymous);
        assert_eq!(principal.roles().len(), 1);
        assert!(principal.roles().iter().all(Role::is_anonymous));
    }

    #[test]
    fn test_principal_roles_are_a_set() {
        let principal = Principal::user(
            3,
            vec![Role::new(2, "admin"), Role::new(2, "admin"), Role::new(4, "user")],
        );
        assert_eq!(principal.roles().len(), 2);
        assert!(principal.has_any_role(&["user".to_string()]));
        assert!(!principal.has_any_role(&["manager".to_string()]));
    }

    #[test]
    fn test_action_from_method() {
        assert_eq!(Action::from_method("POST"), Some(Action::Create));
        assert_eq!(Action::from_method("get"), Some(Action::Read));
        assert_eq!(Action::from_method("PATCH"), Some(Action::Update));
        assert_eq!(Action::from_method("DELETE"), Some(Action::Delete));
        assert_eq!(Action::from_method("OPTIONS"), None);
    }

    #[test]
    fn test_action_operation() {
        assert_eq!(Action::Create.operation(), None);
        assert_eq!(Action::Read.operation(), Some(Operation::Read));
        assert_eq!(Action::Delete.operation(), Some(Operation::Delete));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("update".parse::<Action>().unwrap(), Action::Update);
        assert!("transmogrify".parse::<Action>().is_err());
        assert_eq!("read".parse::<Operation>().unwrap(), Operation::Read);
        assert!("create".parse::<Operation>().is_err());
    }

    #[test]
    fn test_collection_defaults() {
        let collection = Collection::new("records_note");
        assert_eq!(collection.id_column, "id");
        assert_eq!(collection.owner_column, "owner_id");
        let collection = collection.with_owner_column("author_id");
        assert_eq!(collection.owner_column, "author_id");
    }
}
