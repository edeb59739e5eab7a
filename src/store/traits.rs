//! `RecordStore` trait: keyed, tenant-scoped persistence for processed logs.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::Source;

/// Durable identity of a processed record.
///
/// Every store operation takes the full compound key, so a lookup under one
/// tenant can never address a record written under another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub tenant_id: String,
    pub log_id: String,
}

impl RecordKey {
    pub fn new(tenant_id: impl Into<String>, log_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            log_id: log_id.into(),
        }
    }
}

/// Renders as the document path, `tenants/{tenant_id}/processed_logs/{log_id}`.
impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tenants/{}/processed_logs/{}",
            self.tenant_id, self.log_id
        )
    }
}

/// The persisted document at a [`RecordKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub source: Source,
    pub original_text: String,
    pub modified_data: String,
    pub processed_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub text_length: u64,
}

/// A record together with the log id it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub log_id: String,
    #[serde(flatten)]
    pub record: ProcessedRecord,
}

/// Backend-agnostic record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Atomically create or fully replace the record at `key`.
    ///
    /// Either the whole record becomes visible or none of it does.
    async fn upsert(&self, key: &RecordKey, record: &ProcessedRecord) -> Result<(), StoreError>;

    /// Fetch the record at `key`.
    async fn get(&self, key: &RecordKey) -> Result<Option<ProcessedRecord>, StoreError>;

    /// Records of one tenant, most recently processed first, up to `limit`.
    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Number of records held for one tenant.
    async fn count_for_tenant(&self, tenant_id: &str) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_renders_document_path() {
        let key = RecordKey::new("acme_corp", "test-001");
        assert_eq!(key.to_string(), "tenants/acme_corp/processed_logs/test-001");
    }

    #[test]
    fn stored_record_flattens_document_fields() {
        let now = Utc::now();
        let stored = StoredRecord {
            log_id: "l1".into(),
            record: ProcessedRecord {
                source: Source::TextUpload,
                original_text: "a".into(),
                modified_data: "a".into(),
                processed_at: now,
                received_at: now,
                text_length: 1,
            },
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["log_id"], "l1");
        assert_eq!(value["source"], "text_upload");
        assert_eq!(value["text_length"], 1);
    }
}
