//! Error types for the authorization system.
//!
//! # Security Note
//! Authorization errors are configuration or programming errors. A denied
//! request is not an error: the role gate answers `false` and the policy
//! algebra produces a filter that matches nothing.

use thiserror::Error;

/// Errors that can occur while building or loading authorization rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    /// A combinator was built without operands.
    ///
    /// `And()` and `Or()` have no useful meaning; building one is rejected at
    /// construction instead of being evaluated to a constant.
    #[error("{0} policy requires at least one operand")]
    EmptyCombinator(&'static str),

    /// An action name is not one of create, read, update, delete.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// An operation name is not one of read, update, delete.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The grant table could not be parsed.
    #[error("Grant table parsing failed: {0}")]
    GrantTableParse(String),

    /// The policy definition could not be parsed.
    #[error("Policy parsing failed: {0}")]
    PolicyParse(String),
}

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthzError::EmptyCombinator("And");
        assert_eq!(err.to_string(), "And policy requires at least one operand");

        let err = AuthzError::UnknownAction("transmogrify".into());
        assert_eq!(err.to_string(), "Unknown action: transmogrify");
    }
}
