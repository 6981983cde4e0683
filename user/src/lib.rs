pub mod accounts;
pub mod auth;
pub mod database;
pub mod error;
pub mod password;

use std::sync::Arc;
use tracing::{info, warn};

use auth::{Credential, CredentialConfig, SqliteCredentialStore};
use database::UserDatabase;

/// Identity store plus credential issuance.
#[derive(Debug, Clone)]
pub struct UserManager {
    database: Arc<UserDatabase>,
    credentials: Arc<SqliteCredentialStore>,
}

impl UserManager {
    /// Create a new user manager with the provided configuration
    pub async fn new(
        db_config: database::UserDatabaseConfig,
        credential_config: CredentialConfig,
    ) -> error::Result<Self> {
        info!("Initializing user management system");
        let database = UserDatabase::new(db_config).await?;
        Ok(Self::from_database(database, credential_config))
    }

    /// Create a user manager configured from the environment (and `.env`).
    pub async fn from_env() -> error::Result<Self> {
        dotenvy::dotenv().ok();
        Self::new(
            database::UserDatabaseConfig::default(),
            CredentialConfig::from_env()?,
        )
        .await
    }

    pub fn from_database(database: UserDatabase, credential_config: CredentialConfig) -> Self {
        let credentials = Arc::new(SqliteCredentialStore::new(
            database.clone(),
            credential_config,
        ));
        Self {
            database: Arc::new(database),
            credentials,
        }
    }

    pub fn database(&self) -> &UserDatabase {
        &self.database
    }

    /// Shared handle to the credential store.
    pub fn credentials(&self) -> Arc<SqliteCredentialStore> {
        self.credentials.clone()
    }

    /// Verifies a password and issues a fresh credential.
    ///
    /// Returns `None` for an unknown user or wrong password.
    pub async fn login(&self, username: &str, password: &str) -> error::Result<Option<(User, Credential)>> {
        use auth::CredentialStore;

        let Some(user) = self.database.verify_password(username, password).await? else {
            warn!("Failed login attempt");
            return Ok(None);
        };
        let credential = self.credentials.issue(user.id).await?;
        info!("User {} logged in", user.id);
        Ok(Some((user, credential)))
    }

    pub async fn verify_integrity(&self) -> error::Result<bool> {
        self.database.verify_integrity().await
    }
}

// Re-export commonly used types
pub use accounts::User;
pub use database::UserDatabaseConfig;
pub use error::{Result as UserResult, UserError};

#[cfg(test)]
mod tests {
    use super::*;
    use auth::CredentialStore;
    use tempfile::TempDir;

    async fn manager(temp_dir: &TempDir) -> UserManager {
        let config = UserDatabaseConfig {
            database_path: temp_dir.path().join("test_user.db"),
            max_connections: 5,
            connection_timeout: 30,
        };
        UserManager::new(config, CredentialConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_user_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir).await;
        assert!(manager.verify_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_login() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir).await;
        manager
            .database()
            .create_user("alice", "s3cret", Some("Alice"))
            .await
            .unwrap();

        let (user, credential) = manager.login("alice", "s3cret").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(credential.owner_id, user.id);
        assert!(manager
            .credentials()
            .lookup(&credential.session_id)
            .await
            .unwrap()
            .is_some());

        assert!(manager.login("alice", "wrong").await.unwrap().is_none());
        assert!(manager.login("bob", "s3cret").await.unwrap().is_none());
    }
}
