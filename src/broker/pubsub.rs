//! Google Pub/Sub publisher over the REST API.
//!
//! `POST {endpoint}/projects/{project}/topics/{topic}:publish` with
//! `{"messages":[{"data":<base64>,"attributes":{..}}]}`; the response carries
//! `{"messageIds":[..]}`. Works against the emulator when
//! `PubSubConfig::emulator_host` is set. A configured bearer token is sent
//! either way; the emulator ignores it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{OutboundMessage, Publisher};
use crate::config::PubSubConfig;
use crate::error::{ConfigError, PublishError};

#[derive(Serialize)]
struct PublishRequest {
    messages: [WireMessage; 1],
}

#[derive(Serialize)]
struct WireMessage {
    data: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

/// Publishes to a single Pub/Sub topic. Cheap to share behind an `Arc`.
pub struct PubSubPublisher {
    config: PubSubConfig,
    publish_url: String,
    client: reqwest::Client,
}

impl PubSubPublisher {
    pub fn new(config: PubSubConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "PUBSUB_TIMEOUT_SECS".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let publish_url = format!("{}/{}:publish", config.endpoint(), config.topic_path());

        Ok(Self {
            config,
            publish_url,
            client,
        })
    }

    pub fn topic_path(&self) -> String {
        self.config.topic_path()
    }

    /// Current bearer token. The token file is read fresh each call.
    async fn bearer_token(&self) -> Result<Option<SecretString>, PublishError> {
        let Some(path) = &self.config.access_token_file else {
            return Ok(self.config.access_token.clone());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PublishError::Credentials(format!("{}: {e}", path.display())))?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(PublishError::Credentials(format!(
                "{}: token file is empty",
                path.display()
            )));
        }
        Ok(Some(SecretString::from(token)))
    }
}

#[async_trait]
impl Publisher for PubSubPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<String, PublishError> {
        let body = PublishRequest {
            messages: [WireMessage {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
            }],
        };

        let mut request = self.client.post(&self.publish_url).json(&body);
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PublishError::Timeout(self.config.timeout)
            } else {
                PublishError::Unreachable(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PublishResponse = resp
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;

        let message_id = parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| PublishError::InvalidResponse("no messageIds in response".into()))?;

        debug!(topic = %self.config.topic_path(), message_id = %message_id, "Published to Pub/Sub");
        Ok(message_id)
    }
}
