use thiserror::Error;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A credential was requested for a user id that does not exist.
    #[error("Unknown identity: {0}")]
    UnknownIdentity(i64),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// The anonymous role cannot be created, renamed or assigned.
    #[error("Reserved role: {0}")]
    ReservedRole(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt stored data: {0}")]
    CorruptData(String),
}

pub type Result<T> = std::result::Result<T, UserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(UserError::UnknownIdentity(42).to_string(), "Unknown identity: 42");
        assert_eq!(
            UserError::ReservedRole("anonymous".into()).to_string(),
            "Reserved role: anonymous"
        );
    }
}
