//! Ingest request and queue message types shared by gateway and worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a payload reached the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// `application/json` body carrying `tenant_id`, `text` and maybe `log_id`.
    JsonUpload,
    /// Raw text body with the tenant in the `X-Tenant-ID` header.
    TextUpload,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonUpload => "json_upload",
            Self::TextUpload => "text_upload",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json_upload" => Ok(Self::JsonUpload),
            "text_upload" => Ok(Self::TextUpload),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// A validated, normalized ingest request.
///
/// Its JSON serialization is the queue message body. `(tenant_id, log_id)`
/// is fixed here and never changes downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub tenant_id: String,
    pub log_id: String,
    pub text: String,
    pub source: Source,
    pub received_at: DateTime<Utc>,
}

impl IngestRequest {
    /// Build a request stamped with the current time. A missing `log_id`
    /// is replaced by a fresh UUID.
    pub fn new(
        tenant_id: impl Into<String>,
        log_id: Option<String>,
        text: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            log_id: log_id.unwrap_or_else(generate_log_id),
            text: text.into(),
            source,
            received_at: Utc::now(),
        }
    }

    /// Serialize to the queue message body.
    pub fn to_message_data(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Longest accepted `tenant_id` / `log_id`, in bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 1500;

/// Whether `id` can serve as one segment of a document path
/// (`tenants/{tenant_id}/processed_logs/{log_id}`).
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_BYTES
        && !id.contains('/')
        && id != "."
        && id != ".."
}

/// Generate a new unique log identifier.
pub fn generate_log_id() -> String {
    Uuid::new_v4().to_string()
}
