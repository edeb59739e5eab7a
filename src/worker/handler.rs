//! Delivery processing: decode, validate, delay, redact, upsert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::broker::{AckDecision, Delivery, PushHandler, TENANT_ATTRIBUTE};
use crate::config::ProcessingDelay;
use crate::error::WorkerError;
use crate::model::{IngestRequest, Source, is_valid_identifier};
use crate::redact::Redactor;
use crate::store::{ProcessedRecord, RecordKey, RecordStore};
use crate::worker::state::{DeliveryState, DeliveryTracker};

/// Queue message body as it arrives, before any field is trusted.
#[derive(Debug, Deserialize)]
struct QueueMessage {
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    log_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    source: Option<Source>,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
}

/// Summary of a successfully persisted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub key: RecordKey,
    pub text_length: u64,
    pub redactions: usize,
}

/// Consumes deliveries and writes one record per `(tenant_id, log_id)`.
///
/// Processing is a pure function of the message body plus `processed_at`,
/// so any number of redeliveries converge on the same stored content.
pub struct Worker {
    store: Arc<dyn RecordStore>,
    redactor: Redactor,
    delay: ProcessingDelay,
}

impl Worker {
    pub fn new(store: Arc<dyn RecordStore>, delay: ProcessingDelay) -> Self {
        Self {
            store,
            redactor: Redactor::new(),
            delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Process one delivery attempt.
    ///
    /// Returns `WorkerError::Permanent` for malformed messages and
    /// `WorkerError::Transient` when the store write fails.
    pub async fn handle(&self, delivery: &Delivery) -> Result<Processed, WorkerError> {
        let mut tracker = DeliveryTracker::new(delivery.message_id.as_str());
        self.process(delivery, &mut tracker).await
    }

    async fn process(
        &self,
        delivery: &Delivery,
        tracker: &mut DeliveryTracker,
    ) -> Result<Processed, WorkerError> {
        let message_id = delivery.message_id.as_str();

        tracker.advance(DeliveryState::Decoding);
        let request = match decode(delivery) {
            Ok(request) => request,
            Err(reason) => {
                tracker.advance(DeliveryState::PermanentFail);
                error!(
                    message_id,
                    attempt = delivery.delivery_attempt,
                    reason = %reason,
                    "Dropping malformed message"
                );
                return Err(WorkerError::permanent(message_id, reason));
            }
        };
        tracker.advance(DeliveryState::Validated);

        tracker.advance(DeliveryState::Processing);
        let chars = request.text.chars().count();
        let delay = self.delay.for_length(chars);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let redaction = self.redactor.redact_counted(&request.text);
        let key = RecordKey::new(request.tenant_id, request.log_id);
        let record = ProcessedRecord {
            source: request.source,
            original_text: request.text,
            modified_data: redaction.text,
            processed_at: Utc::now(),
            received_at: request.received_at,
            text_length: chars as u64,
        };

        if let Err(e) = self.store.upsert(&key, &record).await {
            tracker.advance(DeliveryState::TransientFail);
            warn!(
                message_id,
                attempt = delivery.delivery_attempt,
                key = %key,
                error = %e,
                "Store write failed, leaving message for redelivery"
            );
            return Err(WorkerError::Transient {
                message_id: message_id.to_string(),
                source: e,
            });
        }
        tracker.advance(DeliveryState::Persisted);

        info!(
            message_id,
            attempt = delivery.delivery_attempt,
            key = %key,
            text_length = record.text_length,
            redactions = redaction.count,
            "Processed log"
        );

        Ok(Processed {
            key,
            text_length: record.text_length,
            redactions: redaction.count,
        })
    }
}

#[async_trait]
impl PushHandler for Worker {
    async fn push(&self, delivery: Delivery) -> AckDecision {
        let mut tracker = DeliveryTracker::new(delivery.message_id.as_str());
        let result = self.process(&delivery, &mut tracker).await;
        debug!(
            message_id = %delivery.message_id,
            attempt = delivery.delivery_attempt,
            state = %tracker.state(),
            transitions = tracker.transitions().len(),
            "Delivery attempt finished"
        );

        match tracker.state().ack_decision() {
            Some(decision) => decision,
            None => match result {
                Ok(_) => AckDecision::Ack,
                Err(e) => e.ack_decision(),
            },
        }
    }
}

/// Decode and validate a delivery body. The error is the human-readable
/// reason for a permanent failure.
fn decode(delivery: &Delivery) -> Result<IngestRequest, String> {
    let message: QueueMessage = serde_json::from_slice(&delivery.data)
        .map_err(|e| format!("malformed message body: {e}"))?;

    let tenant_id = required_identifier(message.tenant_id, "tenant_id")?;
    let log_id = required_identifier(message.log_id, "log_id")?;
    let text = message
        .text
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "missing text".to_string())?;
    let source = message.source.ok_or_else(|| "missing source".to_string())?;
    let received_at = message
        .received_at
        .ok_or_else(|| "missing received_at".to_string())?;

    if let Some(attr) = delivery.attributes.get(TENANT_ATTRIBUTE) {
        if *attr != tenant_id {
            return Err(format!(
                "tenant attribute '{attr}' does not match body tenant '{tenant_id}'"
            ));
        }
    }

    Ok(IngestRequest {
        tenant_id,
        log_id,
        text,
        source,
        received_at,
    })
}

fn required_identifier(value: Option<String>, field: &str) -> Result<String, String> {
    match value {
        None => Err(format!("missing {field}")),
        Some(v) if v.is_empty() => Err(format!("missing {field}")),
        Some(v) if !is_valid_identifier(&v) => Err(format!("invalid {field}")),
        Some(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::StoreError;
    use crate::store::{LibSqlRecordStore, StoredRecord};

    /// Fails the first `failures` upserts, then delegates.
    struct FlakyStore {
        inner: LibSqlRecordStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn upsert(&self, key: &RecordKey, record: &ProcessedRecord) -> Result<(), StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("injected failure".into()));
            }
            self.inner.upsert(key, record).await
        }

        async fn get(&self, key: &RecordKey) -> Result<Option<ProcessedRecord>, StoreError> {
            self.inner.get(key).await
        }

        async fn list_for_tenant(
            &self,
            tenant_id: &str,
            limit: usize,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            self.inner.list_for_tenant(tenant_id, limit).await
        }

        async fn count_for_tenant(&self, tenant_id: &str) -> Result<usize, StoreError> {
            self.inner.count_for_tenant(tenant_id).await
        }
    }

    async fn worker() -> Worker {
        let store = LibSqlRecordStore::open_in_memory().await.unwrap();
        Worker::new(Arc::new(store), ProcessingDelay::none())
    }

    fn delivery(body: serde_json::Value) -> Delivery {
        Delivery {
            message_id: "m-1".into(),
            data: serde_json::to_vec(&body).unwrap(),
            attributes: BTreeMap::new(),
            publish_time: None,
            delivery_attempt: 1,
        }
    }

    fn valid_body(tenant: &str, log_id: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "tenant_id": tenant,
            "log_id": log_id,
            "text": text,
            "source": "json_upload",
            "received_at": "2024-05-01T10:00:00Z",
        })
    }

    #[tokio::test]
    async fn persists_redacted_record() {
        let worker = worker().await;
        let processed = worker
            .handle(&delivery(valid_body(
                "acme_corp",
                "test-001",
                "User 555-0199 accessed the system",
            )))
            .await
            .unwrap();
        assert_eq!(processed.redactions, 1);

        let record = worker
            .store()
            .get(&RecordKey::new("acme_corp", "test-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.modified_data, "User [REDACTED] accessed the system");
        assert_eq!(record.original_text, "User 555-0199 accessed the system");
        assert_eq!(record.source, Source::JsonUpload);
        assert_eq!(record.text_length, 33);
        assert!(record.processed_at >= record.received_at);
    }

    #[tokio::test]
    async fn text_length_counts_characters() {
        let worker = worker().await;
        let processed = worker
            .handle(&delivery(valid_body("t", "l", "héllo ☎")))
            .await
            .unwrap();
        assert_eq!(processed.text_length, 7);
    }

    #[tokio::test]
    async fn malformed_messages_are_permanent() {
        let worker = worker().await;

        let mut not_json = delivery(serde_json::json!({}));
        not_json.data = b"not json".to_vec();

        let cases = [
            not_json,
            delivery(serde_json::json!({"log_id": "l", "text": "x", "source": "json_upload", "received_at": "2024-05-01T10:00:00Z"})),
            delivery(valid_body("t", "l", "")),
            delivery(valid_body("t", "a/b", "x")),
            delivery(serde_json::json!({"tenant_id": "t", "log_id": "l", "text": "x", "source": "fax", "received_at": "2024-05-01T10:00:00Z"})),
        ];
        for case in &cases {
            let err = worker.handle(case).await.unwrap_err();
            assert!(err.is_permanent(), "expected permanent, got {err}");
            assert_eq!(err.ack_decision(), AckDecision::Ack);
        }
        assert_eq!(worker.store().count_for_tenant("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tenant_attribute_must_match_body() {
        let worker = worker().await;
        let mut d = delivery(valid_body("acme", "l", "x"));
        d.attributes
            .insert(TENANT_ATTRIBUTE.to_string(), "other".to_string());
        assert!(worker.handle(&d).await.unwrap_err().is_permanent());
    }

    #[tokio::test]
    async fn store_failure_is_transient_then_recovers() {
        let store = Arc::new(FlakyStore {
            inner: LibSqlRecordStore::open_in_memory().await.unwrap(),
            failures: AtomicUsize::new(1),
        });
        let worker = Worker::new(store.clone(), ProcessingDelay::none());
        let d = delivery(valid_body("acme", "retry-1", "call 555-123-4567"));

        let err = worker.handle(&d).await.unwrap_err();
        assert!(!err.is_permanent());
        assert_eq!(worker.push(d.clone()).await, AckDecision::Ack);

        let record = store
            .get(&RecordKey::new("acme", "retry-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.modified_data, "call [REDACTED]");
    }

    #[tokio::test]
    async fn push_answers_from_final_state() {
        let store = Arc::new(FlakyStore {
            inner: LibSqlRecordStore::open_in_memory().await.unwrap(),
            failures: AtomicUsize::new(1),
        });
        let worker = Worker::new(store, ProcessingDelay::none());

        let mut bad = delivery(serde_json::json!({}));
        bad.data = b"{".to_vec();
        assert_eq!(worker.push(bad).await, AckDecision::Ack);

        let d = delivery(valid_body("acme", "push-1", "x"));
        assert_eq!(worker.push(d.clone()).await, AckDecision::Nack);
        assert_eq!(worker.push(d).await, AckDecision::Ack);
        assert_eq!(worker.store().count_for_tenant("acme").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_keeps_one_record() {
        let worker = worker().await;
        let d = delivery(valid_body("acme", "dup", "555-0199"));
        worker.handle(&d).await.unwrap();
        let first = worker
            .store()
            .get(&RecordKey::new("acme", "dup"))
            .await
            .unwrap()
            .unwrap();

        worker.handle(&d).await.unwrap();
        let second = worker
            .store()
            .get(&RecordKey::new("acme", "dup"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(worker.store().count_for_tenant("acme").await.unwrap(), 1);
        assert_eq!(first.modified_data, second.modified_data);
        assert_eq!(first.original_text, second.original_text);
        assert_eq!(first.received_at, second.received_at);
    }

    #[tokio::test]
    async fn concurrent_duplicates_converge() {
        let worker = worker().await;
        let d = delivery(valid_body("acme", "race", "dial 555 123 4567"));

        let results = futures::future::join_all((0..4).map(|_| worker.handle(&d))).await;
        assert!(results.iter().all(Result::is_ok));

        assert_eq!(worker.store().count_for_tenant("acme").await.unwrap(), 1);
        let record = worker
            .store()
            .get(&RecordKey::new("acme", "race"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.modified_data, "dial [REDACTED]");
    }

    #[tokio::test]
    async fn delay_scales_with_length() {
        let store = LibSqlRecordStore::open_in_memory().await.unwrap();
        let worker = Worker::new(
            Arc::new(store),
            ProcessingDelay {
                per_char: Duration::from_millis(20),
                cap: Duration::from_millis(60),
            },
        );
        let started = tokio::time::Instant::now();
        worker
            .handle(&delivery(valid_body("t", "l", "ab")))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));

        // Capped: 100 chars would be 2s uncapped.
        let started = tokio::time::Instant::now();
        worker
            .handle(&delivery(valid_body("t", "l2", &"x".repeat(100))))
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_secs(2));
    }
}
