use crate::{Database, Result};
use authz::policy::ACL_TABLE;
use std::path::PathBuf;
use tracing::info;

/// Database initialization configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Whether to create the core tables on initialization
    pub create_tables: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let database_path = std::env::var("KEYSTONE_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let data_dir = std::env::var("DATA_PATH").unwrap_or_else(|_| "data".to_string());
                PathBuf::from(data_dir).join("keystone.db")
            });

        Self {
            database_path,
            create_tables: true,
        }
    }
}

impl DatabaseConfig {
    /// Create a new database configuration from the environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new database configuration with a specific database path
    pub fn new_with_path(database_path: PathBuf) -> Self {
        Self {
            database_path,
            create_tables: true,
        }
    }

    /// Set a custom database path
    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = path;
        self
    }

    /// Set whether to create tables on initialization
    pub fn with_create_tables(mut self, create: bool) -> Self {
        self.create_tables = create;
        self
    }
}

/// Initialize the database with the given configuration
pub async fn initialize_database(config: DatabaseConfig) -> Result<Database> {
    info!("Initializing database at {:?}", config.database_path);

    let db_path_str = config
        .database_path
        .to_str()
        .ok_or_else(|| crate::DatabaseError::Other("Invalid database path".into()))?;

    let db = Database::new(db_path_str).await?;

    if config.create_tables {
        create_core_tables(&db).await?;
    }

    Ok(db)
}

/// Creates the access-control entry table.
///
/// Entries are unique per `(record_type, record_id, role_id, permission)`;
/// a duplicate insert fails instead of merging.
pub async fn create_core_tables(db: &Database) -> Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_type TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            role_id INTEGER NOT NULL,
            permission TEXT NOT NULL CHECK (permission IN ('read', 'update', 'delete')),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (record_type, record_id, role_id, permission)
        )
        "#,
        table = ACL_TABLE
    );
    db.execute_raw(&sql).await?;

    db.execute_raw(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_record ON {table} (record_id, record_type)",
        table = ACL_TABLE
    ))
    .await?;

    info!("Core tables ready");
    Ok(())
}
