use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod acl;
pub mod error;
pub mod filter;
pub mod init;
pub mod records;

pub use acl::{make_record_acl, AclEntry};
pub use error::{DatabaseError, Result};
pub use init::{initialize_database, DatabaseConfig};
pub use records::Record;

/// Database connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection. The file is created if missing.
    pub async fn new(database_path: &str) -> Result<Self> {
        let in_memory = database_path.contains(":memory:");

        if !in_memory {
            let file_path = database_path
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        info!("Connecting to database at: {}", database_path);

        // SQLite connection strings are sqlite://path for absolute paths and
        // sqlite:path for relative ones.
        let connection_string =
            if database_path.starts_with("sqlite:") || database_path.starts_with(":memory:") {
                database_path.to_string()
            } else if database_path.starts_with('/') {
                format!("sqlite://{}", database_path)
            } else {
                format!("sqlite:{}", database_path)
            };

        debug!("Using connection string: {}", connection_string);

        let options = SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        debug!("Database connection established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Get a clone of the connection pool
    pub fn get_pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    /// Check if a table exists
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let query = r#"
            SELECT COUNT(*) as count
            FROM sqlite_master
            WHERE type='table' AND name=?
        "#;

        let result: (i32,) = sqlx::query_as(query)
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0 > 0)
    }

    /// Execute raw SQL (for table creation, etc.)
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Round-trips a trivial query; used by health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("keystone.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        assert!(db.pool().acquire().await.is_ok());
        assert!(db_path.exists());
        db.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_table_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

        db.execute_raw("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        assert!(db.table_exists("test_table").await.unwrap());
        assert!(!db.table_exists("non_existent_table").await.unwrap());
    }
}
