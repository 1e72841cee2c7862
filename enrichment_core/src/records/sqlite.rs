//! SQLite-backed RecordStore.
//!
//! Records are stored as one JSON document per row, with the lookup keys
//! (email, LinkedIn handle) lifted into indexed columns. Upserts run the guarded
//! merge inside a transaction so concurrent consumers never regress a provider
//! state.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::models::{EnrichmentRecord, RecordLookup};
use super::traits::RecordStore;
use crate::models::{normalize_email, normalize_linkedin_handle};
use crate::{Error, Result};

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Create (or open) the store at `path`, creating parent directories as needed.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store("sqlite_record_store mkdir", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::store("sqlite_record_store connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::store("sqlite_record_store connect", e))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::store("sqlite_record_store schema", e))?;

        Ok(Self { pool })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS enrichment_records (
  uuid TEXT PRIMARY KEY,
  email TEXT,
  linkedin_handle TEXT,
  record_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS enrichment_records_email_idx ON enrichment_records(email);
CREATE INDEX IF NOT EXISTS enrichment_records_handle_idx ON enrichment_records(linkedin_handle);
"#;

// Fixed precision so TEXT ordering matches time ordering.
fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(row: &SqliteRow) -> Result<EnrichmentRecord> {
    let json: String = row.get("record_json");
    serde_json::from_str(&json).map_err(|e| Error::backend("sqlite_record_store decode", e))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, lookup: &RecordLookup) -> Result<Option<EnrichmentRecord>> {
        let (sql, key) = match lookup {
            RecordLookup::Uuid(id) => (
                "SELECT record_json FROM enrichment_records WHERE uuid = ?1",
                id.to_string(),
            ),
            RecordLookup::Email(email) => match normalize_email(email) {
                Some(email) => (
                    "SELECT record_json FROM enrichment_records WHERE email = ?1 ORDER BY created_at ASC, uuid ASC LIMIT 1",
                    email,
                ),
                None => return Ok(None),
            },
            RecordLookup::Handle(handle) => match normalize_linkedin_handle(handle) {
                Some(handle) => (
                    "SELECT record_json FROM enrichment_records WHERE linkedin_handle = ?1 ORDER BY created_at ASC, uuid ASC LIMIT 1",
                    handle,
                ),
                None => return Ok(None),
            },
        };
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::store("sqlite_record_store get", e))?;
        row.as_ref().map(decode).transpose()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(uuid = %record.uuid))]
    async fn upsert(&self, record: &EnrichmentRecord) -> Result<EnrichmentRecord> {
        let mut incoming = record.clone();
        incoming.normalize();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::store("sqlite_record_store begin", e))?;

        let existing = sqlx::query("SELECT record_json FROM enrichment_records WHERE uuid = ?1")
            .bind(incoming.uuid.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::store("sqlite_record_store upsert read", e))?;

        let merged = match existing {
            Some(row) => {
                let mut stored = decode(&row)?;
                stored.merge_from(&incoming);
                stored
            }
            None => incoming,
        };

        let json = serde_json::to_string(&merged)
            .map_err(|e| Error::backend("sqlite_record_store encode", e))?;
        sqlx::query(
            r#"
INSERT INTO enrichment_records (uuid, email, linkedin_handle, record_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(uuid) DO UPDATE SET
  email = excluded.email,
  linkedin_handle = excluded.linkedin_handle,
  record_json = excluded.record_json,
  created_at = excluded.created_at,
  updated_at = excluded.updated_at
"#,
        )
        .bind(merged.uuid.to_string())
        .bind(merged.email.as_deref())
        .bind(merged.linkedin_handle.as_deref())
        .bind(json)
        .bind(fmt_dt(merged.created_at))
        .bind(fmt_dt(merged.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::store("sqlite_record_store upsert write", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::store("sqlite_record_store commit", e))?;
        Ok(merged)
    }

    async fn exists_handle(&self, handle: &str) -> Result<bool> {
        let Some(handle) = normalize_linkedin_handle(handle) else {
            return Ok(false);
        };
        let row = sqlx::query("SELECT 1 FROM enrichment_records WHERE linkedin_handle = ?1 LIMIT 1")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::store("sqlite_record_store exists_handle", e))?;
        Ok(row.is_some())
    }

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<EnrichmentRecord>> {
        let Some(email) = normalize_email(email) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT record_json FROM enrichment_records WHERE email = ?1 ORDER BY created_at ASC, uuid ASC",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::store("sqlite_record_store find_all_by_email", e))?;
        rows.iter().map(decode).collect()
    }

    async fn duplicate_emails(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
SELECT email FROM enrichment_records
WHERE email IS NOT NULL
GROUP BY email
HAVING COUNT(*) > 1
ORDER BY email ASC
"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::store("sqlite_record_store duplicate_emails", e))?;
        Ok(rows.iter().map(|r| r.get("email")).collect())
    }

    async fn delete(&self, uuid: Uuid) -> Result<bool> {
        let res = sqlx::query("DELETE FROM enrichment_records WHERE uuid = ?1")
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::store("sqlite_record_store delete", e))?;
        Ok(res.rows_affected() > 0)
    }
}
