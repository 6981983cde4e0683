//! Record-level access-control policies.
//!
//! A [`Policy`] is an immutable tree. Evaluating it for an operation and a
//! principal never touches storage; it only describes an [`Alteration`] that
//! the storage layer applies to a query: extra LEFT OUTER JOINs plus a boolean
//! filter over the record and the joined tables.
//!
//! ```text
//!   Or
//!   ├── IsOwner                 -> owner_id = <user id>
//!   ├── HasRole [admin]         -> true | false
//!   └── InRecordAcl             -> LEFT JOIN record_acl acl ON acl.record_id = id
//!                                  acl.role_id IN (...) AND acl.record_type = ?
//!                                  AND acl.permission = ?
//! ```
//!
//! Combinator operands are an [`Operands`] list that cannot be empty, whether
//! a policy is built in code or loaded from configuration.

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, Result};
use crate::types::{Collection, Operation, Principal};

/// Table holding per-record access-control entries.
pub const ACL_TABLE: &str = "record_acl";
/// Alias the entry table is joined under.
pub const ACL_ALIAS: &str = "acl";
pub const ACL_RECORD_ID: &str = "record_id";
pub const ACL_RECORD_TYPE: &str = "record_type";
pub const ACL_ROLE_ID: &str = "role_id";
pub const ACL_PERMISSION: &str = "permission";

/// A column referenced by a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// A column of the filtered collection.
    Record(String),
    /// A column of a joined table, addressed by its alias.
    Joined { alias: String, column: String },
}

/// A literal bound into a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
}

/// A boolean filter expression over a collection and its joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolExpr {
    Const(bool),
    Eq(ColumnRef, SqlValue),
    In(ColumnRef, Vec<SqlValue>),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
}

/// A LEFT OUTER JOIN from the filtered collection to another table.
///
/// Renders as `LEFT OUTER JOIN <table> AS <alias>
/// ON <alias>.<right_column> = <collection>.<left_column>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub table: String,
    pub alias: String,
    pub left_column: String,
    pub right_column: String,
}

/// The change a policy makes to a query on a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alteration {
    pub joins: Vec<JoinSpec>,
    pub filter: BoolExpr,
}

impl Alteration {
    /// An alteration that leaves the query untouched.
    pub fn unrestricted() -> Self {
        Self {
            joins: Vec::new(),
            filter: BoolExpr::Const(true),
        }
    }

    fn filter_only(filter: BoolExpr) -> Self {
        Self {
            joins: Vec::new(),
            filter,
        }
    }
}

/// The operands of an `And` or `Or` node. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operands(Vec<Policy>);

impl Operands {
    /// Fails with [`AuthzError::EmptyCombinator`] naming `combinator` when
    /// `children` is empty.
    pub fn new(combinator: &'static str, children: Vec<Policy>) -> Result<Self> {
        if children.is_empty() {
            return Err(AuthzError::EmptyCombinator(combinator));
        }
        Ok(Self(children))
    }

    pub fn as_slice(&self) -> &[Policy] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Policy> {
        self.0
    }
}

/// A record-level access-control policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicySpec", into = "PolicySpec")]
pub enum Policy {
    /// All operands must hold.
    And(Operands),
    /// At least one operand must hold.
    Or(Operands),
    /// The principal owns the record.
    IsOwner,
    /// The principal holds one of the named roles.
    HasRole(Vec<String>),
    /// An access-control entry grants one of the principal's roles the operation.
    InRecordAcl,
    Allow,
    Deny,
}

impl Policy {
    /// Builds a conjunction. Fails on an empty operand list.
    pub fn and(children: Vec<Policy>) -> Result<Self> {
        Operands::new("And", children).map(Policy::And)
    }

    /// Builds a disjunction. Fails on an empty operand list.
    pub fn or(children: Vec<Policy>) -> Result<Self> {
        Operands::new("Or", children).map(Policy::Or)
    }

    pub fn has_role<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Policy::HasRole(names.into_iter().map(Into::into).collect())
    }

    /// Describes how a query on `collection` must change so that only records
    /// `principal` may perform `operation` on remain.
    pub fn evaluate(
        &self,
        operation: Operation,
        principal: &Principal,
        record_type: &str,
        collection: &Collection,
    ) -> Alteration {
        match self {
            Policy::And(children) => {
                let (joins, filters) =
                    Self::evaluate_all(children.as_slice(), operation, principal, record_type, collection);
                Alteration {
                    joins,
                    filter: BoolExpr::And(filters),
                }
            }
            Policy::Or(children) => {
                let (joins, filters) =
                    Self::evaluate_all(children.as_slice(), operation, principal, record_type, collection);
                Alteration {
                    joins,
                    filter: BoolExpr::Or(filters),
                }
            }
            Policy::IsOwner => match principal.identity().user_id() {
                None => Alteration::filter_only(BoolExpr::Const(false)),
                Some(user_id) => Alteration::filter_only(BoolExpr::Eq(
                    ColumnRef::Record(collection.owner_column.clone()),
                    SqlValue::Integer(user_id),
                )),
            },
            Policy::HasRole(names) => {
                Alteration::filter_only(BoolExpr::Const(principal.has_any_role(names)))
            }
            Policy::InRecordAcl => {
                let joined = |column: &str| ColumnRef::Joined {
                    alias: ACL_ALIAS.to_string(),
                    column: column.to_string(),
                };
                let role_ids = principal
                    .role_ids()
                    .map(|id| SqlValue::Integer(id.0))
                    .collect();
                Alteration {
                    joins: vec![JoinSpec {
                        table: ACL_TABLE.to_string(),
                        alias: ACL_ALIAS.to_string(),
                        left_column: collection.id_column.clone(),
                        right_column: ACL_RECORD_ID.to_string(),
                    }],
                    filter: BoolExpr::And(vec![
                        BoolExpr::In(joined(ACL_ROLE_ID), role_ids),
                        BoolExpr::Eq(joined(ACL_RECORD_TYPE), SqlValue::Text(record_type.to_string())),
                        BoolExpr::Eq(
                            joined(ACL_PERMISSION),
                            SqlValue::Text(operation.as_str().to_string()),
                        ),
                    ]),
                }
            }
            Policy::Allow => Alteration::filter_only(BoolExpr::Const(true)),
            Policy::Deny => Alteration::filter_only(BoolExpr::Const(false)),
        }
    }

    // Joins are concatenated as-is. Two InRecordAcl operands under one
    // combinator join the entry table twice under the same alias; the storage
    // renderer collapses identical joins.
    fn evaluate_all(
        children: &[Policy],
        operation: Operation,
        principal: &Principal,
        record_type: &str,
        collection: &Collection,
    ) -> (Vec<JoinSpec>, Vec<BoolExpr>) {
        let mut joins = Vec::new();
        let mut filters = Vec::with_capacity(children.len());
        for child in children {
            let alteration = child.evaluate(operation, principal, record_type, collection);
            joins.extend(alteration.joins);
            filters.push(alteration.filter);
        }
        (joins, filters)
    }
}

/// Configuration representation of a policy.
///
/// ```yaml
/// or:
///   - is_owner
///   - has_role: [admin]
///   - in_record_acl
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PolicySpec {
    Leaf(LeafSpec),
    Node(NodeSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LeafSpec {
    Allow,
    Deny,
    IsOwner,
    InRecordAcl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NodeSpec {
    And(Vec<PolicySpec>),
    Or(Vec<PolicySpec>),
    HasRole(Vec<String>),
}

impl TryFrom<PolicySpec> for Policy {
    type Error = AuthzError;

    fn try_from(spec: PolicySpec) -> Result<Self> {
        let convert = |children: Vec<PolicySpec>| -> Result<Vec<Policy>> {
            children.into_iter().map(Policy::try_from).collect()
        };
        match spec {
            PolicySpec::Leaf(LeafSpec::Allow) => Ok(Policy::Allow),
            PolicySpec::Leaf(LeafSpec::Deny) => Ok(Policy::Deny),
            PolicySpec::Leaf(LeafSpec::IsOwner) => Ok(Policy::IsOwner),
            PolicySpec::Leaf(LeafSpec::InRecordAcl) => Ok(Policy::InRecordAcl),
            PolicySpec::Node(NodeSpec::HasRole(names)) => Ok(Policy::HasRole(names)),
            PolicySpec::Node(NodeSpec::And(children)) => Policy::and(convert(children)?),
            PolicySpec::Node(NodeSpec::Or(children)) => Policy::or(convert(children)?),
        }
    }
}

impl From<Policy> for PolicySpec {
    fn from(policy: Policy) -> Self {
        let convert = |children: Vec<Policy>| children.into_iter().map(PolicySpec::from).collect();
        match policy {
            Policy::Allow => PolicySpec::Leaf(LeafSpec::Allow),
            Policy::Deny => PolicySpec::Leaf(LeafSpec::Deny),
            Policy::IsOwner => PolicySpec::Leaf(LeafSpec::IsOwner),
            Policy::InRecordAcl => PolicySpec::Leaf(LeafSpec::InRecordAcl),
            Policy::HasRole(names) => PolicySpec::Node(NodeSpec::HasRole(names)),
            Policy::And(children) => PolicySpec::Node(NodeSpec::And(convert(children.into_vec()))),
            Policy::Or(children) => PolicySpec::Node(NodeSpec::Or(convert(children.into_vec()))),
        }
    }
}

/// Parses a policy from YAML.
pub fn from_yaml(source: &str) -> Result<Policy> {
    serde_yaml::from_str(source).map_err(|e| AuthzError::PolicyParse(e.to_string()))
}
