//! Authorization primitives for Keystone.
//!
//! Two checks guard every record request, in this order:
//!
//! 1. **Role gate** ([`RoleGate`]): does any of the principal's roles hold the
//!    action on the named resource in the [`GrantTable`]? A deny here is a 403.
//! 2. **Record policy** ([`Policy`]): evaluated into an [`Alteration`] that the
//!    storage layer applies to the query. Records filtered out are invisible
//!    and surface as 404.
//!
//! This crate has no storage dependency. Role resolution is abstracted behind
//! [`RoleDirectory`] so the user store can supply principals without the
//! authorization types depending on it.
//!
//! # Example
//!
//! ```rust
//! use authz::{Action, GrantTable, Policy, Principal, Role, RoleGate};
//! use authz::types::{Collection, Operation};
//!
//! let gate = RoleGate::new(GrantTable::new().with_grant("user", "notes", [Action::Read]));
//! let principal = Principal::user(1, vec![Role::new(2, "user")]);
//! assert!(gate.allowed(&principal, "notes", Action::Read));
//!
//! let alteration = Policy::IsOwner.evaluate(
//!     Operation::Read,
//!     &principal,
//!     "note",
//!     &Collection::new("records_notes"),
//! );
//! assert!(alteration.joins.is_empty());
//! ```

pub mod error;
pub mod grants;
pub mod policy;
pub mod types;

use async_trait::async_trait;

pub use error::{AuthzError, Result};
pub use grants::{GrantTable, RoleGate};
pub use policy::{Alteration, BoolExpr, ColumnRef, JoinSpec, Operands, Policy, SqlValue};
pub use types::{
    Action, Collection, Identity, Operation, Principal, Role, RoleId, UserId, ANONYMOUS_ROLE,
};

/// Errors raised while building policies.
pub type PolicyError = AuthzError;

/// Resolves an identity into a principal carrying its roles.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the principal for `identity`. The anonymous identity resolves to
    /// the principal holding only the anonymous role.
    async fn principal_for(&self, identity: Identity) -> std::result::Result<Principal, Self::Error>;
}
