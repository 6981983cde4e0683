//! Per-user symmetric credentials.
//!
//! A credential is a `(session_id, secret)` pair issued after a password
//! login. Requests are signed with the secret and name the credential by its
//! session id. Credentials expire lazily: nothing sweeps idle credentials,
//! the next [`CredentialStore::touch_at`] on an idle one deletes it.

use async_trait::async_trait;
use authz::UserId;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::env;
use tracing::{debug, info};

use crate::database::UserDatabase;
use crate::error::{Result, UserError};

/// Random bytes in a session id (hex encoded to 48 characters).
pub const SESSION_ID_BYTES: usize = 24;
/// Random bytes in a secret (hex encoded to 64 characters).
pub const SECRET_BYTES: usize = 32;
/// Idle timeout used when none is configured.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub session_id: String,
    pub secret: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Result of touching a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// The credential is live; its access time is now.
    Refreshed,
    /// The credential was idle too long and has been deleted.
    Expired,
    NotFound,
}

/// Credential store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialConfig {
    pub idle_timeout: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::seconds(DEFAULT_IDLE_TIMEOUT_SECONDS),
        }
    }
}

impl CredentialConfig {
    /// Reads `KEYSTONE_IDLE_TIMEOUT_SECONDS`, falling back to the default
    /// when unset.
    pub fn from_env() -> Result<Self> {
        match env::var("KEYSTONE_IDLE_TIMEOUT_SECONDS") {
            Ok(value) => Ok(Self::default().with_idle_timeout(parse_idle_timeout(&value)?)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Parses a positive idle timeout in seconds that fits a [`Duration`].
pub fn parse_idle_timeout(value: &str) -> Result<Duration> {
    let seconds = value.trim().parse::<i64>().map_err(|e| {
        UserError::Configuration(format!(
            "Invalid KEYSTONE_IDLE_TIMEOUT_SECONDS '{}': {}",
            value, e
        ))
    })?;
    if seconds <= 0 {
        return Err(UserError::Configuration(
            "KEYSTONE_IDLE_TIMEOUT_SECONDS must be positive".to_string(),
        ));
    }
    Duration::try_seconds(seconds).ok_or_else(|| {
        UserError::Configuration(format!(
            "KEYSTONE_IDLE_TIMEOUT_SECONDS out of range: {}",
            seconds
        ))
    })
}

/// Issues, looks up, touches and revokes credentials.
///
/// Every time-dependent operation takes the current time explicitly; the
/// plain variants use the wall clock.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Issues a fresh credential for an existing user.
    async fn issue_at(&self, owner_id: UserId, now: DateTime<Utc>) -> Result<Credential>;

    async fn lookup(&self, session_id: &str) -> Result<Option<Credential>>;

    /// Refreshes the access time, or deletes the credential if it has been
    /// idle longer than the configured timeout.
    async fn touch_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<TouchOutcome>;

    /// Deletes a credential. Revoking an unknown credential is not an error.
    async fn revoke(&self, session_id: &str) -> Result<()>;

    async fn issue(&self, owner_id: UserId) -> Result<Credential> {
        self.issue_at(owner_id, Utc::now()).await
    }

    async fn touch(&self, session_id: &str) -> Result<TouchOutcome> {
        self.touch_at(session_id, Utc::now()).await
    }
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn from_unix(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| UserError::CorruptData(format!("Stored timestamp out of range: {}", seconds)))
}

/// SQLite-backed credential store sharing the user database.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    db: UserDatabase,
    config: CredentialConfig,
}

impl SqliteCredentialStore {
    pub fn new(db: UserDatabase, config: CredentialConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn issue_at(&self, owner_id: UserId, now: DateTime<Utc>) -> Result<Credential> {
        if !self.db.user_exists(owner_id).await? {
            return Err(UserError::UnknownIdentity(owner_id));
        }

        // Stored at second resolution.
        let now = from_unix(now.timestamp())?;
        let credential = Credential {
            session_id: random_hex(SESSION_ID_BYTES),
            secret: random_hex(SECRET_BYTES),
            owner_id,
            created_at: now,
            accessed_at: now,
        };

        sqlx::query(
            "INSERT INTO credentials (session_id, secret, owner_id, created_at, accessed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&credential.session_id)
        .bind(&credential.secret)
        .bind(credential.owner_id)
        .bind(credential.created_at.timestamp())
        .bind(credential.accessed_at.timestamp())
        .execute(self.db.pool())
        .await?;

        info!("Issued credential for user {}", owner_id);
        Ok(credential)
    }

    async fn lookup(&self, session_id: &str) -> Result<Option<Credential>> {
        let row = sqlx::query(
            "SELECT session_id, secret, owner_id, created_at, accessed_at FROM credentials WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| -> Result<Credential> {
            Ok(Credential {
                session_id: row.try_get("session_id")?,
                secret: row.try_get("secret")?,
                owner_id: row.try_get("owner_id")?,
                created_at: from_unix(row.try_get("created_at")?)?,
                accessed_at: from_unix(row.try_get("accessed_at")?)?,
            })
        })
        .transpose()
    }

    async fn touch_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<TouchOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let accessed_at: Option<i64> =
            sqlx::query_scalar("SELECT accessed_at FROM credentials WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(accessed_at) = accessed_at else {
            tx.commit().await?;
            return Ok(TouchOutcome::NotFound);
        };

        let idle = now.timestamp() - accessed_at;
        if idle > self.config.idle_timeout.num_seconds() {
            sqlx::query("DELETE FROM credentials WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            debug!("Credential expired after {}s idle", idle);
            return Ok(TouchOutcome::Expired);
        }

        sqlx::query("UPDATE credentials SET accessed_at = MAX(accessed_at, ?) WHERE session_id = ?")
            .bind(now.timestamp())
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(TouchOutcome::Refreshed)
    }

    async fn revoke(&self, session_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM credentials WHERE session_id = ?")
            .bind(session_id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() > 0 {
            info!("Revoked credential");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_user_database;
    use chrono::TimeZone;

    async fn store_with_user(timeout: i64) -> (tempfile::TempDir, SqliteCredentialStore, UserId) {
        let (dir, db) = temp_user_database().await;
        let user = db.create_user("alice", "pw", None).await.unwrap();
        let config = CredentialConfig::default().with_idle_timeout(Duration::seconds(timeout));
        (dir, SqliteCredentialStore::new(db, config), user.id)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_issue_and_lookup() {
        let (_dir, store, user_id) = store_with_user(3600).await;
        let credential = store.issue_at(user_id, t0()).await.unwrap();

        assert_eq!(credential.session_id.len(), 48);
        assert_eq!(credential.secret.len(), 64);
        assert!(credential.session_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(credential.created_at, credential.accessed_at);

        let found = store.lookup(&credential.session_id).await.unwrap().unwrap();
        assert_eq!(found, credential);
        assert!(store.lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_issue_for_unknown_user() {
        let (_dir, store, _) = store_with_user(3600).await;
        assert!(matches!(
            store.issue_at(999, t0()).await,
            Err(UserError::UnknownIdentity(999))
        ));
    }

    #[tokio::test]
    async fn test_credentials_are_unique() {
        let (_dir, store, user_id) = store_with_user(3600).await;
        let a = store.issue(user_id).await.unwrap();
        let b = store.issue(user_id).await.unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.secret, b.secret);
    }

    #[tokio::test]
    async fn test_touch_idle_expiry() {
        let (_dir, store, user_id) = store_with_user(3).await;
        let credential = store.issue_at(user_id, t0()).await.unwrap();
        let sid = &credential.session_id;

        assert_eq!(
            store.touch_at(sid, t0() + Duration::seconds(1)).await.unwrap(),
            TouchOutcome::Refreshed
        );
        assert_eq!(
            store.touch_at(sid, t0() + Duration::seconds(2)).await.unwrap(),
            TouchOutcome::Refreshed
        );
        let touched = store.lookup(sid).await.unwrap().unwrap();
        assert_eq!(touched.accessed_at, t0() + Duration::seconds(2));

        assert_eq!(
            store.touch_at(sid, t0() + Duration::seconds(6)).await.unwrap(),
            TouchOutcome::Expired
        );
        assert!(store.lookup(sid).await.unwrap().is_none());
        assert_eq!(
            store.touch_at(sid, t0() + Duration::seconds(7)).await.unwrap(),
            TouchOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_touch_at_exact_timeout_refreshes() {
        let (_dir, store, user_id) = store_with_user(3).await;
        let credential = store.issue_at(user_id, t0()).await.unwrap();
        assert_eq!(
            store
                .touch_at(&credential.session_id, t0() + Duration::seconds(3))
                .await
                .unwrap(),
            TouchOutcome::Refreshed
        );
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (_dir, store, user_id) = store_with_user(3600).await;
        let credential = store.issue(user_id).await.unwrap();

        store.revoke(&credential.session_id).await.unwrap();
        store.revoke(&credential.session_id).await.unwrap();
        assert!(store.lookup(&credential.session_id).await.unwrap().is_none());
        assert_eq!(
            store.touch(&credential.session_id).await.unwrap(),
            TouchOutcome::NotFound
        );
    }

    #[test]
    fn test_default_idle_timeout() {
        assert_eq!(CredentialConfig::default().idle_timeout, Duration::seconds(3600));
    }

    #[test]
    fn test_parse_idle_timeout() {
        assert_eq!(parse_idle_timeout(" 90 ").unwrap(), Duration::seconds(90));
        assert!(matches!(parse_idle_timeout("0"), Err(UserError::Configuration(_))));
        assert!(matches!(parse_idle_timeout("soon"), Err(UserError::Configuration(_))));
        // Parses as i64 but exceeds what a Duration can hold.
        assert!(matches!(
            parse_idle_timeout(&i64::MAX.to_string()),
            Err(UserError::Configuration(_))
        ));
    }
}
