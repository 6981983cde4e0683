use authz::policy::ACL_TABLE;
use authz::{Operation, RoleId};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, info};

use crate::{Database, DatabaseError, Result};

/// Grants one role one operation on one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub record_type: String,
    pub record_id: i64,
    pub role_id: RoleId,
    pub permission: Operation,
}

impl AclEntry {
    pub fn new(
        record_type: impl Into<String>,
        record_id: i64,
        role_id: RoleId,
        permission: Operation,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            record_id,
            role_id,
            permission,
        }
    }

    fn duplicate(&self) -> DatabaseError {
        DatabaseError::DuplicateAclEntry {
            record_type: self.record_type.clone(),
            record_id: self.record_id,
            role_id: self.role_id.0,
            permission: self.permission.to_string(),
        }
    }
}

/// Builds one entry for every combination of the given record types,
/// record ids, roles and permissions.
pub fn make_record_acl(
    record_types: &[&str],
    record_ids: &[i64],
    role_ids: &[RoleId],
    permissions: &[Operation],
) -> Vec<AclEntry> {
    let mut entries =
        Vec::with_capacity(record_types.len() * record_ids.len() * role_ids.len() * permissions.len());
    for record_type in record_types {
        for record_id in record_ids {
            for role_id in role_ids {
                for permission in permissions {
                    entries.push(AclEntry::new(*record_type, *record_id, *role_id, *permission));
                }
            }
        }
    }
    entries
}

impl Database {
    /// Inserts an access-control entry.
    ///
    /// An entry that already exists fails with
    /// [`DatabaseError::DuplicateAclEntry`].
    pub async fn grant_acl(&self, entry: &AclEntry) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (record_type, record_id, role_id, permission) VALUES (?, ?, ?, ?)",
            ACL_TABLE
        );
        let result = sqlx::query(&sql)
            .bind(&entry.record_type)
            .bind(entry.record_id)
            .bind(entry.role_id.0)
            .bind(entry.permission.as_str())
            .execute(self.pool())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => entry.duplicate(),
                other => DatabaseError::Connection(other),
            })?;

        debug!(
            "Granted {} on {}/{} to role {}",
            entry.permission, entry.record_type, entry.record_id, entry.role_id
        );
        Ok(result.last_insert_rowid())
    }

    /// Inserts every entry in a single transaction. Nothing is written if
    /// any entry is a duplicate.
    pub async fn grant_acl_all(&self, entries: &[AclEntry]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (record_type, record_id, role_id, permission) VALUES (?, ?, ?, ?)",
            ACL_TABLE
        );
        let mut tx = self.pool().begin().await?;
        for entry in entries {
            sqlx::query(&sql)
                .bind(&entry.record_type)
                .bind(entry.record_id)
                .bind(entry.role_id.0)
                .bind(entry.permission.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                        entry.duplicate()
                    }
                    other => DatabaseError::Connection(other),
                })?;
        }
        tx.commit().await?;

        info!("Granted {} access-control entries", entries.len());
        Ok(())
    }

    /// Removes an entry. Returns whether it existed.
    pub async fn revoke_acl(&self, entry: &AclEntry) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE record_type = ? AND record_id = ? AND role_id = ? AND permission = ?",
            ACL_TABLE
        );
        let result = sqlx::query(&sql)
            .bind(&entry.record_type)
            .bind(entry.record_id)
            .bind(entry.role_id.0)
            .bind(entry.permission.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lists the entries attached to one record.
    pub async fn acl_for_record(&self, record_type: &str, record_id: i64) -> Result<Vec<AclEntry>> {
        let sql = format!(
            "SELECT record_type, record_id, role_id, permission FROM {} \
             WHERE record_type = ? AND record_id = ? ORDER BY role_id, permission",
            ACL_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(record_type)
            .bind(record_id)
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| -> Result<AclEntry> {
                let permission: String = row.try_get("permission")?;
                Ok(AclEntry {
                    record_type: row.try_get("record_type")?,
                    record_id: row.try_get("record_id")?,
                    role_id: RoleId(row.try_get("role_id")?),
                    permission: permission
                        .parse()
                        .map_err(|e: authz::AuthzError| DatabaseError::Validation(e.to_string()))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_database;

    #[test]
    fn test_make_record_acl_cross_product() {
        let entries = make_record_acl(
            &["notes", "tasks"],
            &[1, 2, 3],
            &[RoleId(1), RoleId(2)],
            &[Operation::Read, Operation::Update],
        );
        assert_eq!(entries.len(), 2 * 3 * 2 * 2);
        assert_eq!(entries[0], AclEntry::new("notes", 1, RoleId(1), Operation::Read));
        assert!(entries.contains(&AclEntry::new("tasks", 3, RoleId(2), Operation::Update)));

        let unique: std::collections::HashSet<_> = entries.iter().collect();
        assert_eq!(unique.len(), entries.len());
    }

    #[test]
    fn test_make_record_acl_empty_axis() {
        assert!(make_record_acl(&["notes"], &[], &[RoleId(1)], &[Operation::Read]).is_empty());
    }

    #[tokio::test]
    async fn test_grant_and_list() {
        let (_dir, db) = temp_database().await;
        db.grant_acl(&AclEntry::new("notes", 1, RoleId(2), Operation::Update))
            .await
            .unwrap();
        db.grant_acl(&AclEntry::new("notes", 1, RoleId(2), Operation::Read))
            .await
            .unwrap();

        let entries = db.acl_for_record("notes", 1).await.unwrap();
        assert_eq!(
            entries,
            vec![
                AclEntry::new("notes", 1, RoleId(2), Operation::Read),
                AclEntry::new("notes", 1, RoleId(2), Operation::Update),
            ]
        );
        assert!(db.acl_for_record("notes", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_entry_rejected() {
        let (_dir, db) = temp_database().await;
        let entry = AclEntry::new("notes", 1, RoleId(2), Operation::Read);
        db.grant_acl(&entry).await.unwrap();

        let err = db.grant_acl(&entry).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateAclEntry { record_id: 1, role_id: 2, .. }));
        assert_eq!(db.acl_for_record("notes", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grant_all_is_atomic() {
        let (_dir, db) = temp_database().await;
        db.grant_acl(&AclEntry::new("notes", 2, RoleId(1), Operation::Read))
            .await
            .unwrap();

        let entries = make_record_acl(&["notes"], &[1, 2], &[RoleId(1)], &[Operation::Read]);
        let err = db.grant_acl_all(&entries).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateAclEntry { .. }));
        assert!(db.acl_for_record("notes", 1).await.unwrap().is_empty());

        let fresh = make_record_acl(&["notes"], &[3, 4], &[RoleId(1)], &[Operation::Read, Operation::Delete]);
        db.grant_acl_all(&fresh).await.unwrap();
        assert_eq!(db.acl_for_record("notes", 3).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revoke() {
        let (_dir, db) = temp_database().await;
        let entry = AclEntry::new("notes", 1, RoleId(2), Operation::Delete);
        db.grant_acl(&entry).await.unwrap();
        assert!(db.revoke_acl(&entry).await.unwrap());
        assert!(!db.revoke_acl(&entry).await.unwrap());
    }
}
