use authz::{Alteration, Collection, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::filter::{bind_values, quote_identifier, render};
use crate::{Database, DatabaseError, Result};

/// A stored JSON record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub owner_id: Option<UserId>,
    pub attributes: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let attributes: String = row.try_get("attributes")?;
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            attributes: serde_json::from_str(&attributes)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Record operations on one collection.
///
/// Every read, update and delete goes through an [`Alteration`]: its joins are
/// applied, its filter restricts the rows, and `DISTINCT` collapses the
/// duplicates a one-to-many join produces. Records the alteration filters out
/// behave exactly like records that do not exist.
pub struct RecordStore<'a> {
    db: &'a Database,
    collection: &'a Collection,
}

impl<'a> RecordStore<'a> {
    pub fn new(db: &'a Database, collection: &'a Collection) -> Self {
        Self { db, collection }
    }

    /// Creates the backing table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let table = quote_identifier(&self.collection.table)?;
        let id = quote_identifier(&self.collection.id_column)?;
        let owner = quote_identifier(&self.collection.owner_column)?;

        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                {id} INTEGER PRIMARY KEY AUTOINCREMENT,
                {owner} INTEGER NULL,
                attributes TEXT NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#
        );
        self.db
            .execute_raw(&sql)
            .await
            .map_err(|e| DatabaseError::TableCreation(format!("{}: {}", self.collection.table, e)))?;

        debug!("Table {} ready", self.collection.table);
        Ok(())
    }

    /// Inserts a record stamped with `owner_id`.
    pub async fn create(&self, owner_id: Option<UserId>, attributes: &JsonValue) -> Result<Record> {
        if !attributes.is_object() {
            return Err(DatabaseError::Validation(
                "record attributes must be a JSON object".to_string(),
            ));
        }

        let sql = format!(
            "INSERT INTO {} ({}, attributes, created_at, updated_at) VALUES (?, ?, ?, ?)",
            quote_identifier(&self.collection.table)?,
            quote_identifier(&self.collection.owner_column)?,
        );
        let now = Utc::now();
        let result = sqlx::query(&sql)
            .bind(owner_id)
            .bind(serde_json::to_string(attributes)?)
            .bind(now)
            .bind(now)
            .execute(self.db.pool())
            .await?;

        let id = result.last_insert_rowid();
        info!("Created record {} in {}", id, self.collection.table);

        Ok(Record {
            id,
            owner_id,
            attributes: attributes.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Lists every record visible under `alteration`, ordered by id.
    pub async fn list(&self, alteration: &Alteration) -> Result<Vec<Record>> {
        let rendered = render(alteration, self.collection)?;
        let sql = format!(
            "{} WHERE {} ORDER BY {}.{}",
            self.select_clause(&rendered.joins)?,
            rendered.predicate,
            quote_identifier(&self.collection.table)?,
            quote_identifier(&self.collection.id_column)?,
        );
        debug!("Executing SQL: {}", sql);

        let rows = bind_values(sqlx::query(&sql), &rendered.binds)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Record::from_row).collect()
    }

    /// Fetches a record by id if it is visible under `alteration`.
    pub async fn get(&self, alteration: &Alteration, id: i64) -> Result<Option<Record>> {
        let rendered = render(alteration, self.collection)?;
        let sql = format!(
            "{} WHERE {}.{} = ? AND {}",
            self.select_clause(&rendered.joins)?,
            quote_identifier(&self.collection.table)?,
            quote_identifier(&self.collection.id_column)?,
            rendered.predicate,
        );
        debug!("Executing SQL: {}", sql);

        let query = sqlx::query(&sql).bind(id);
        let row = bind_values(query, &rendered.binds)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(Record::from_row).transpose()
    }

    /// Merges `changes` into the attributes of a visible record.
    ///
    /// Top-level keys in `changes` replace existing ones; a `null` value
    /// removes the key. Returns `None` when the record is not visible.
    pub async fn update(
        &self,
        alteration: &Alteration,
        id: i64,
        changes: &JsonValue,
    ) -> Result<Option<Record>> {
        let changes = changes.as_object().ok_or_else(|| {
            DatabaseError::Validation("record attributes must be a JSON object".to_string())
        })?;

        let Some(mut record) = self.get(alteration, id).await? else {
            return Ok(None);
        };

        let mut attributes = match record.attributes {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in changes {
            if value.is_null() {
                attributes.remove(key);
            } else {
                attributes.insert(key.clone(), value.clone());
            }
        }
        record.attributes = JsonValue::Object(attributes);
        record.updated_at = Utc::now();

        let rendered = render(alteration, self.collection)?;
        let sql = format!(
            "UPDATE {table} SET attributes = ?, updated_at = ? WHERE {id} = ? AND {id} IN ({visible})",
            table = quote_identifier(&self.collection.table)?,
            id = quote_identifier(&self.collection.id_column)?,
            visible = self.visible_ids(&rendered.joins, &rendered.predicate)?,
        );
        debug!("Executing SQL: {}", sql);

        let query = sqlx::query(&sql)
            .bind(serde_json::to_string(&record.attributes)?)
            .bind(record.updated_at)
            .bind(id);
        let result = bind_values(query, &rendered.binds)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        info!("Updated record {} in {}", id, self.collection.table);
        Ok(Some(record))
    }

    /// Deletes a visible record. Returns `false` when it is not visible.
    pub async fn delete(&self, alteration: &Alteration, id: i64) -> Result<bool> {
        let rendered = render(alteration, self.collection)?;
        let sql = format!(
            "DELETE FROM {table} WHERE {id} = ? AND {id} IN ({visible})",
            table = quote_identifier(&self.collection.table)?,
            id = quote_identifier(&self.collection.id_column)?,
            visible = self.visible_ids(&rendered.joins, &rendered.predicate)?,
        );
        debug!("Executing SQL: {}", sql);

        let query = sqlx::query(&sql).bind(id);
        let result = bind_values(query, &rendered.binds)
            .execute(self.db.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted record {} from {}", id, self.collection.table);
        }
        Ok(deleted)
    }

    fn select_clause(&self, joins: &str) -> Result<String> {
        let table = quote_identifier(&self.collection.table)?;
        Ok(format!(
            "SELECT DISTINCT {table}.{id} AS id, {table}.{owner} AS owner_id, \
             {table}.attributes AS attributes, {table}.created_at AS created_at, \
             {table}.updated_at AS updated_at FROM {table} {joins}",
            id = quote_identifier(&self.collection.id_column)?,
            owner = quote_identifier(&self.collection.owner_column)?,
        ))
    }

    fn visible_ids(&self, joins: &str, predicate: &str) -> Result<String> {
        let table = quote_identifier(&self.collection.table)?;
        Ok(format!(
            "SELECT DISTINCT {table}.{id} FROM {table} {joins} WHERE {predicate}",
            id = quote_identifier(&self.collection.id_column)?,
        ))
    }
}
