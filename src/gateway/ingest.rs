//! Accept-and-enqueue: validate an upload and publish it exactly once.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::normalize::normalize;
use crate::broker::{OutboundMessage, Publisher, TENANT_ATTRIBUTE};
use crate::error::{Error, PublishError, Result};

/// Body of the 202 reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub status: &'static str,
    pub message_id: String,
    pub log_id: String,
    pub tenant_id: String,
}

/// Ingestion gateway. Never redacts and never touches the store.
pub struct Gateway {
    publisher: Arc<dyn Publisher>,
}

impl Gateway {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Validate one upload and hand it to the broker.
    ///
    /// Fails with `Error::Validation` before anything is published, or with
    /// `Error::Publish` when the broker did not take the message.
    pub async fn accept(
        &self,
        content_type: Option<&str>,
        tenant_header: Option<&[u8]>,
        body: &[u8],
    ) -> Result<Accepted> {
        let request = match normalize(content_type, tenant_header, body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejected upload");
                return Err(e.into());
            }
        };

        let data = request.to_message_data().map_err(PublishError::from)?;
        let message =
            OutboundMessage::new(data).with_attribute(TENANT_ATTRIBUTE, request.tenant_id.as_str());

        let message_id = self.publisher.publish(message).await.map_err(|e| {
            warn!(
                tenant_id = %request.tenant_id,
                log_id = %request.log_id,
                error = %e,
                "Publish failed"
            );
            Error::from(e)
        })?;

        info!(
            tenant_id = %request.tenant_id,
            log_id = %request.log_id,
            message_id = %message_id,
            source = %request.source,
            "Accepted upload"
        );

        Ok(Accepted {
            status: "accepted",
            message_id,
            log_id: request.log_id,
            tenant_id: request.tenant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ValidationError;
    use crate::model::IngestRequest;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<OutboundMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, message: OutboundMessage) -> std::result::Result<String, PublishError> {
            if self.fail {
                return Err(PublishError::Unreachable("down".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(message);
            Ok(format!("msg-{}", sent.len()))
        }
    }

    #[tokio::test]
    async fn publishes_once_with_tenant_attribute() {
        let publisher = Arc::new(RecordingPublisher::default());
        let gateway = Gateway::new(publisher.clone());

        let accepted = gateway
            .accept(
                Some("application/json"),
                None,
                br#"{"tenant_id":"acme_corp","log_id":"test-001","text":"User 555-0199 accessed the system"}"#,
            )
            .await
            .unwrap();
        assert_eq!(accepted.message_id, "msg-1");
        assert_eq!(accepted.log_id, "test-001");

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attributes[TENANT_ATTRIBUTE], "acme_corp");
        let body: IngestRequest = serde_json::from_slice(&sent[0].data).unwrap();
        // Gateway never redacts.
        assert_eq!(body.text, "User 555-0199 accessed the system");
    }

    #[tokio::test]
    async fn validation_failure_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let gateway = Gateway::new(publisher.clone());

        let err = gateway
            .accept(Some("application/json"), None, br#"{"text":"hi"}"#)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingTenantId)
        ));
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_surfaces() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let gateway = Gateway::new(publisher);

        let err = gateway
            .accept(Some("text/plain"), Some(b"beta_inc".as_slice()), b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(PublishError::Unreachable(_))));
    }
}
