use chrono::Utc;
use sqlx::Row;

use pocketbook_core::records::{RecordKey, RecordStore, StoreError};

use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed record documents.
///
/// Both mutations are single statements built on SQLite's JSON functions, so
/// concurrent writers on the same key never overwrite each other's changes.
pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &RecordKey) -> Result<Option<Vec<String>>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM record_document WHERE user_id = ? AND team_id = ?")
            .bind(&key.user_id)
            .bind(&key.team_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => {
                let data: String =
                    r.try_get("data").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let records = serde_json::from_str::<Vec<String>>(&data)
                    .map_err(|e| RepositoryError::Decode(format!("record document {key}: {e}")))?;
                Ok(Some(records))
            }
            None => Ok(None),
        }
    }

    async fn push(&self, key: &RecordKey, value: &str) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO record_document (user_id, team_id, data, created_at, updated_at)
             VALUES (?, ?, json_array(?), ?, ?)
             ON CONFLICT(user_id, team_id) DO UPDATE SET
                 data = json_insert(record_document.data, '$[#]', json_extract(excluded.data, '$[0]')),
                 updated_at = excluded.updated_at",
        )
        .bind(&key.user_id)
        .bind(&key.team_id)
        .bind(value)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pull(&self, key: &RecordKey, value: &str) -> Result<u64, RepositoryError> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE record_document SET
                 data = (
                     SELECT json_group_array(value ORDER BY key)
                     FROM json_each(record_document.data)
                     WHERE value <> ?
                 ),
                 updated_at = ?
             WHERE user_id = ? AND team_id = ?",
        )
        .bind(value)
        .bind(&now)
        .bind(&key.user_id)
        .bind(&key.team_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl RecordStore for SqlRecordStore {
    async fn get(&self, key: &RecordKey) -> Result<Vec<String>, StoreError> {
        self.fetch(key).await?.ok_or(StoreError::NotFound)
    }

    async fn append(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        Ok(self.push(key, value).await?)
    }

    async fn remove(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        match self.pull(key, value).await? {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }
}
