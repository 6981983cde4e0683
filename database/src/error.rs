use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Table creation error: {0}")]
    TableCreation(String),

    #[error("Duplicate access-control entry: {record_type}/{record_id} role {role_id} {permission}")]
    DuplicateAclEntry {
        record_type: String,
        record_id: i64,
        role_id: i64,
        permission: String,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Other error: {0}")]
    Other(String),
}
