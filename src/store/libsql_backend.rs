//! libSQL backend: async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. The compound primary key
//! `(tenant_id, log_id)` is the only addressing scheme, and every write is a
//! single `INSERT .. ON CONFLICT DO UPDATE` statement, so a record is either
//! fully replaced or untouched.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::Source;
use crate::store::migrations;
use crate::store::traits::{ProcessedRecord, RecordKey, RecordStore, StoredRecord};

/// libSQL record store.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlRecordStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlRecordStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Record store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and standalone runs).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    /// Open the store described by `config`.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.is_in_memory() {
            Self::open_in_memory().await
        } else {
            Self::open(&config.db_path).await
        }
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so stored timestamps sort lexically and round-trip exactly.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid timestamp {s:?}: {e}")))
}

const RECORD_COLUMNS: &str =
    "log_id, source, original_text, modified_data, processed_at, received_at, text_length";

/// Map a libsql Row (in `RECORD_COLUMNS` order) to a `StoredRecord`.
fn row_to_record(row: &libsql::Row) -> Result<StoredRecord, StoreError> {
    let parse = |e: libsql::Error| StoreError::Query(format!("row parse: {e}"));

    let log_id: String = row.get(0).map_err(parse)?;
    let source_str: String = row.get(1).map_err(parse)?;
    let original_text: String = row.get(2).map_err(parse)?;
    let modified_data: String = row.get(3).map_err(parse)?;
    let processed_str: String = row.get(4).map_err(parse)?;
    let received_str: String = row.get(5).map_err(parse)?;
    let text_length: i64 = row.get(6).map_err(parse)?;

    let source: Source = source_str.parse().map_err(StoreError::Query)?;

    Ok(StoredRecord {
        log_id,
        record: ProcessedRecord {
            source,
            original_text,
            modified_data,
            processed_at: parse_datetime(&processed_str)?,
            received_at: parse_datetime(&received_str)?,
            text_length: text_length.max(0) as u64,
        },
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlRecordStore {
    async fn upsert(&self, key: &RecordKey, record: &ProcessedRecord) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO processed_logs (tenant_id, log_id, source, original_text, modified_data,
                processed_at, received_at, text_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (tenant_id, log_id) DO UPDATE SET
                source = excluded.source,
                original_text = excluded.original_text,
                modified_data = excluded.modified_data,
                processed_at = excluded.processed_at,
                received_at = excluded.received_at,
                text_length = excluded.text_length",
            params![
                key.tenant_id.as_str(),
                key.log_id.as_str(),
                record.source.as_str(),
                record.original_text.as_str(),
                record.modified_data.as_str(),
                format_datetime(&record.processed_at),
                format_datetime(&record.received_at),
                record.text_length as i64,
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("upsert: {e}")))?;

        debug!(key = %key, "Record upserted");
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<ProcessedRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM processed_logs WHERE tenant_id = ?1 AND log_id = ?2"
                ),
                params![key.tenant_id.as_str(), key.log_id.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?.record)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get: {e}"))),
        }
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM processed_logs WHERE tenant_id = ?1
                     ORDER BY processed_at DESC, log_id ASC LIMIT ?2"
                ),
                params![tenant_id, limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_for_tenant: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_for_tenant: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn count_for_tenant(&self, tenant_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM processed_logs WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("count_for_tenant: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("row parse: {e}")))?;
                Ok(count.max(0) as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("count_for_tenant: {e}"))),
        }
    }
}
