use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use authz::ANONYMOUS_ROLE;

/// Configuration for the user database
#[derive(Debug, Clone)]
pub struct UserDatabaseConfig {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

impl Default for UserDatabaseConfig {
    fn default() -> Self {
        let database_path = std::env::var("KEYSTONE_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/keystone.db"));
        Self {
            database_path,
            max_connections: 5,
            connection_timeout: 30,
        }
    }
}

/// Roles created at bootstrap besides the anonymous role.
const DEFAULT_ROLES: &[(&str, &str)] = &[
    ("admin", "Full access to every resource"),
    ("user", "Authenticated user"),
];

/// Identity schema. Credential timestamps are unix seconds.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        name TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_roles (
        user_id INTEGER NOT NULL,
        role_id INTEGER NOT NULL,
        assigned_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (user_id, role_id),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS credentials (
        session_id TEXT PRIMARY KEY,
        secret TEXT NOT NULL,
        owner_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        accessed_at INTEGER NOT NULL,
        FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE,
        CHECK (accessed_at >= created_at)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_user_roles_user ON user_roles(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_credentials_owner ON credentials(owner_id)",
];

/// Identity store: users, roles, role assignments and credentials.
#[derive(Debug, Clone)]
pub struct UserDatabase {
    pool: Pool<Sqlite>,
}

impl UserDatabase {
    /// Open (creating if needed) the user database described by `config`.
    pub async fn new(config: UserDatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening user database at {}", config.database_path.display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&config.database_path)
                    .create_if_missing(true),
            )
            .await?;

        Self::from_pool(pool).await
    }

    /// Use an existing pool, running migrations on it.
    ///
    /// The records store and the identity store may share one SQLite file.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.run_migrations().await?;
        info!("User database initialized successfully");
        Ok(db)
    }

    /// Creates the identity tables. Safe to run on every start.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running user database migrations");

        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.create_default_roles().await?;

        info!("User database migrations completed");

        Ok(())
    }

    /// Create the anonymous role and the default roles
    async fn create_default_roles(&self) -> Result<()> {
        let roles = std::iter::once((ANONYMOUS_ROLE, "Unauthenticated requests"))
            .chain(DEFAULT_ROLES.iter().copied());

        for (name, description) in roles {
            let inserted = sqlx::query("INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)")
                .bind(name)
                .bind(description)
                .execute(&self.pool)
                .await?
                .rows_affected();
            if inserted > 0 {
                info!("Created default role: {}", name);
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Checks that every identity table and the anonymous role exist.
    pub async fn verify_integrity(&self) -> Result<bool> {
        let tables = ["users", "roles", "user_roles", "credentials"];

        for table in tables {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                warn!("Missing table: {}", table);
                return Ok(false);
            }
        }

        let anonymous = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE name = ?")
            .bind(ANONYMOUS_ROLE)
            .fetch_one(&self.pool)
            .await?;
        if anonymous != 1 {
            warn!("Anonymous role missing");
            return Ok(false);
        }

        info!("Database integrity check passed");
        Ok(true)
    }

    /// Close the database connection
    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        info!("User database connection closed");
        Ok(())
    }
}
