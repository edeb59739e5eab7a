//! Pub/Sub push request body.
//!
//! ```json
//! {
//!   "message": {
//!     "data": "<base64>",
//!     "attributes": {"tenant_id": "acme"},
//!     "messageId": "123",
//!     "publishTime": "2024-01-01T00:00:00Z"
//!   },
//!   "subscription": "projects/p/subscriptions/s",
//!   "deliveryAttempt": 2
//! }
//! ```
//!
//! Pub/Sub sends both camelCase and snake_case spellings of the id and
//! publish time; either is accepted.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Delivery;

/// Why a push body could not be turned into a [`Delivery`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("push body is not a valid envelope: {0}")]
    InvalidJson(String),

    #[error("push envelope has no message data")]
    MissingData,

    #[error("message data is not valid base64: {0}")]
    InvalidBase64(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default, rename = "deliveryAttempt")]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, rename = "messageId", alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default, rename = "publishTime", alias = "publish_time")]
    pub publish_time: Option<DateTime<Utc>>,
}

impl PushEnvelope {
    /// Parse a raw push request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(body).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))
    }

    /// Build the envelope Pub/Sub would push for a delivery.
    #[cfg(test)]
    pub(crate) fn from_delivery(delivery: &Delivery, subscription: Option<String>) -> Self {
        Self {
            message: PushMessage {
                data: Some(STANDARD.encode(&delivery.data)),
                attributes: delivery.attributes.clone(),
                message_id: Some(delivery.message_id.clone()),
                publish_time: delivery.publish_time,
            },
            subscription,
            delivery_attempt: Some(delivery.delivery_attempt),
        }
    }

    /// Decode the base64 payload into a delivery.
    pub fn into_delivery(self) -> Result<Delivery, EnvelopeError> {
        let encoded = self.message.data.ok_or(EnvelopeError::MissingData)?;
        let data = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| EnvelopeError::InvalidBase64(e.to_string()))?;

        Ok(Delivery {
            message_id: self.message.message_id.unwrap_or_default(),
            data,
            attributes: self.message.attributes,
            publish_time: self.message.publish_time,
            delivery_attempt: self.delivery_attempt.unwrap_or(1),
        })
    }
}
