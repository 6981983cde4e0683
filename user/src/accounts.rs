//! Users, roles and role assignments.

use async_trait::async_trait;
use authz::{Identity, Principal, Role, RoleDirectory, RoleId, UserId, ANONYMOUS_ROLE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::database::UserDatabase;
use crate::error::{Result, UserError};
use crate::password;

/// A registered user. The password hash never leaves this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct RoleRow {
    id: i64,
    name: String,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role::new(row.id, row.name)
    }
}

impl UserDatabase {
    /// Registers a user with an Argon2 password hash.
    pub async fn create_user(&self, username: &str, password: &str, name: Option<&str>) -> Result<User> {
        let hash = password::hash_password(password)?;
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(&hash)
        .bind(name)
        .bind(created_at)
        .bind(created_at)
        .execute(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                UserError::DuplicateUser(username.to_string())
            }
            other => UserError::Database(other),
        })?;

        let user = User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            name: name.map(str::to_string),
            created_at,
        };
        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, name, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, name, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }

    pub async fn user_exists(&self, id: UserId) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }

    /// Checks a username/password pair. Unknown users and wrong passwords
    /// both yield `None`.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT password_hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;

        let Some((hash,)) = row else {
            debug!("Password check for unknown user {}", username);
            password::verify_against_dummy(password);
            return Ok(None);
        };

        if !password::verify_password(password, &hash)? {
            debug!("Password mismatch for user {}", username);
            return Ok(None);
        }

        self.find_user_by_username(username).await
    }

    /// Creates a role. The anonymous role name is reserved.
    pub async fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role> {
        if name == ANONYMOUS_ROLE {
            return Err(UserError::ReservedRole(name.to_string()));
        }

        if let Some(existing) = self.find_role(name).await? {
            return Ok(existing);
        }

        let result = sqlx::query("INSERT INTO roles (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(self.pool())
            .await?;

        info!("Created role: {}", name);
        Ok(Role::new(result.last_insert_rowid(), name))
    }

    pub async fn find_role(&self, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT id, name FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Role::from))
    }

    /// The reserved anonymous role, created at bootstrap.
    pub async fn anonymous_role(&self) -> Result<Role> {
        self.find_role(ANONYMOUS_ROLE)
            .await?
            .ok_or_else(|| UserError::RoleNotFound(ANONYMOUS_ROLE.to_string()))
    }

    /// Assigns a role to a user. Assigning a role the user already holds is a
    /// no-op; the anonymous role can never be assigned.
    pub async fn assign_role(&self, user_id: UserId, role_name: &str) -> Result<Role> {
        if role_name == ANONYMOUS_ROLE {
            return Err(UserError::ReservedRole(role_name.to_string()));
        }
        if !self.user_exists(user_id).await? {
            return Err(UserError::UnknownIdentity(user_id));
        }
        let role = self
            .find_role(role_name)
            .await?
            .ok_or_else(|| UserError::RoleNotFound(role_name.to_string()))?;

        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.id.0)
            .execute(self.pool())
            .await?;

        info!("Assigned role {} to user {}", role.name, user_id);
        Ok(role)
    }

    /// Roles held by a user, ordered by id.
    pub async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    pub async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT id, name FROM roles WHERE id = ?")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Role::from))
    }
}

#[async_trait]
impl RoleDirectory for UserDatabase {
    type Error = UserError;

    async fn principal_for(&self, identity: Identity) -> Result<Principal> {
        match identity {
            Identity::Anonymous => Ok(Principal::anonymous(self.anonymous_role().await?)),
            Identity::User(id) => {
                if !self.user_exists(id).await? {
                    return Err(UserError::UnknownIdentity(id));
                }
                Ok(Principal::user(id, self.roles_for_user(id).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_user_database;

    #[tokio::test]
    async fn test_create_and_verify_user() {
        let (_dir, db) = temp_user_database().await;
        let user = db.create_user("alice", "s3cret", Some("Alice")).await.unwrap();

        let verified = db.verify_password("alice", "s3cret").await.unwrap().unwrap();
        assert_eq!(verified.id, user.id);
        assert_eq!(verified.name.as_deref(), Some("Alice"));

        assert!(db.verify_password("alice", "wrong").await.unwrap().is_none());
        assert!(db.verify_password("bob", "s3cret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_verification() {
        let (_dir, db) = temp_user_database().await;
        db.create_user("alice", "s3cret", None).await.unwrap();

        // Misses go through the same hashing path and still report no match.
        assert!(db.verify_password("nobody", "s3cret").await.unwrap().is_none());
        assert!(db.verify_password("nobody", "keystone-unknown-user").await.unwrap().is_none());
        assert!(db.verify_password("", "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let (_dir, db) = temp_user_database().await;
        db.create_user("alice", "a", None).await.unwrap();
        let err = db.create_user("alice", "b", None).await.unwrap_err();
        assert!(matches!(err, UserError::DuplicateUser(name) if name == "alice"));
    }

    #[tokio::test]
    async fn test_roles_are_a_set() {
        let (_dir, db) = temp_user_database().await;
        let user = db.create_user("alice", "pw", None).await.unwrap();

        db.assign_role(user.id, "admin").await.unwrap();
        db.assign_role(user.id, "admin").await.unwrap();
        db.assign_role(user.id, "user").await.unwrap();

        let names: Vec<String> = db
            .roles_for_user(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["admin", "user"]);
    }

    #[tokio::test]
    async fn test_anonymous_role_is_reserved() {
        let (_dir, db) = temp_user_database().await;
        let user = db.create_user("alice", "pw", None).await.unwrap();

        assert!(matches!(
            db.assign_role(user.id, ANONYMOUS_ROLE).await,
            Err(UserError::ReservedRole(_))
        ));
        assert!(matches!(
            db.create_role(ANONYMOUS_ROLE, None).await,
            Err(UserError::ReservedRole(_))
        ));
    }

    #[tokio::test]
    async fn test_assign_unknown() {
        let (_dir, db) = temp_user_database().await;
        assert!(matches!(
            db.assign_role(99, "admin").await,
            Err(UserError::UnknownIdentity(99))
        ));
        let user = db.create_user("alice", "pw", None).await.unwrap();
        assert!(matches!(
            db.assign_role(user.id, "manager").await,
            Err(UserError::RoleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_role_is_idempotent() {
        let (_dir, db) = temp_user_database().await;
        let first = db.create_role("editor", Some("Edits things")).await.unwrap();
        let second = db.create_role("editor", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(db.role_by_id(first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_principal_resolution() {
        let (_dir, db) = temp_user_database().await;
        let user = db.create_user("alice", "pw", None).await.unwrap();
        db.assign_role(user.id, "user").await.unwrap();

        let anonymous = db.principal_for(Identity::Anonymous).await.unwrap();
        assert_eq!(anonymous.role_names().collect::<Vec<_>>(), vec![ANONYMOUS_ROLE]);

        let principal = db.principal_for(Identity::User(user.id)).await.unwrap();
        assert_eq!(principal.identity(), Identity::User(user.id));
        assert_eq!(principal.role_names().collect::<Vec<_>>(), vec!["user"]);

        assert!(matches!(
            db.principal_for(Identity::User(12345)).await,
            Err(UserError::UnknownIdentity(12345))
        ));
    }
}
