//! Error types for the ingestion pipeline.

use std::time::Duration;

use crate::broker::AckDecision;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Rejection of an inbound request by the gateway.
///
/// The `Display` text is what the caller sees in the 400 response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing tenant_id")]
    MissingTenantId,

    #[error("missing tenant header")]
    MissingTenantHeader,

    #[error("missing text")]
    MissingText,

    #[error("malformed payload")]
    MalformedPayload,

    #[error("invalid {field}")]
    InvalidIdentifier { field: &'static str },
}

/// Failure to hand a message to the broker.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Broker rejected publish with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Broker publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid broker response: {0}")]
    InvalidResponse(String),

    #[error("Broker is closed")]
    Closed,

    #[error("Cannot load broker credentials: {0}")]
    Credentials(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a failed delivery, classified by whether redelivery can help.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Structural defect in the message. Retrying cannot fix it.
    #[error("Permanent failure for message {message_id}: {reason}")]
    Permanent { message_id: String, reason: String },

    /// A dependency was unavailable. The broker should redeliver.
    #[error("Transient failure for message {message_id}: {source}")]
    Transient {
        message_id: String,
        #[source]
        source: StoreError,
    },
}

impl WorkerError {
    pub fn permanent(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permanent {
            message_id: message_id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// Permanent failures are acknowledged so the broker drops them;
    /// transient ones are not, so the broker redelivers.
    pub fn ack_decision(&self) -> AckDecision {
        match self {
            Self::Permanent { .. } => AckDecision::Ack,
            Self::Transient { .. } => AckDecision::Nack,
        }
    }
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_match_wire_contract() {
        assert_eq!(ValidationError::MissingTenantId.to_string(), "missing tenant_id");
        assert_eq!(
            ValidationError::MissingTenantHeader.to_string(),
            "missing tenant header"
        );
        assert_eq!(ValidationError::MalformedPayload.to_string(), "malformed payload");
        assert_eq!(
            ValidationError::InvalidIdentifier { field: "log_id" }.to_string(),
            "invalid log_id"
        );
    }

    #[test]
    fn worker_error_classification() {
        let permanent = WorkerError::permanent("m1", "bad json");
        assert!(permanent.is_permanent());
        assert_eq!(permanent.ack_decision(), AckDecision::Ack);

        let transient = WorkerError::Transient {
            message_id: "m2".into(),
            source: StoreError::Unavailable("down".into()),
        };
        assert!(!transient.is_permanent());
        assert_eq!(transient.ack_decision(), AckDecision::Nack);
    }
}
