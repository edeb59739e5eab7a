//! Worker HTTP surface: the Pub/Sub push endpoint and the read API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, warn};

use super::handler::Worker;
use crate::broker::PushEnvelope;
use crate::error::WorkerError;
use crate::store::{RecordKey, RecordStore, StoredRecord};

/// Default page size for record listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;
/// Largest page size a caller may ask for.
pub const MAX_LIST_LIMIT: usize = 1000;

/// POST /
///
/// Pub/Sub push delivery. Any 2xx acknowledges the message, so permanent
/// failures answer 200 and only transient ones answer 503.
async fn push(State(worker): State<Arc<Worker>>, body: Bytes) -> Response {
    let delivery = match PushEnvelope::from_slice(&body).and_then(PushEnvelope::into_delivery) {
        Ok(delivery) => delivery,
        Err(e) => {
            error!(error = %e, "Dropping undecodable push request");
            return rejected(e.to_string());
        }
    };

    match worker.handle(&delivery).await {
        Ok(processed) => Json(serde_json::json!({
            "status": "processed",
            "tenant_id": processed.key.tenant_id,
            "log_id": processed.key.log_id,
        }))
        .into_response(),
        Err(WorkerError::Permanent { reason, .. }) => rejected(reason),
        Err(e @ WorkerError::Transient { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

fn rejected(reason: String) -> Response {
    Json(serde_json::json!({"status": "rejected", "error": reason})).into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy"}))
}

/// Build the push endpoint routes.
pub fn push_routes(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/", post(push))
        .route("/health", get(health))
        .with_state(worker)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// GET /tenants/{tenant_id}/processed_logs/{log_id}
///
/// Returns the stored record, or 404 if none exists under this tenant.
async fn get_record(
    State(store): State<Arc<dyn RecordStore>>,
    Path((tenant_id, log_id)): Path<(String, String)>,
) -> Response {
    let key = RecordKey::new(tenant_id, log_id);
    match store.get(&key).await {
        Ok(Some(record)) => Json(serde_json::json!({
            "tenant_id": key.tenant_id,
            "record": StoredRecord { log_id: key.log_id, record },
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("{key} not found")})),
        )
            .into_response(),
        Err(e) => store_unavailable(e),
    }
}

/// GET /tenants/{tenant_id}/processed_logs?limit=N
///
/// Most recently processed first. `limit` defaults to 100 and is clamped
/// to 1..=1000.
async fn list_records(
    State(store): State<Arc<dyn RecordStore>>,
    Path(tenant_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match store.list_for_tenant(&tenant_id, limit).await {
        Ok(records) => Json(serde_json::json!({
            "tenant_id": tenant_id,
            "count": records.len(),
            "records": records,
        }))
        .into_response(),
        Err(e) => store_unavailable(e),
    }
}

fn store_unavailable(e: crate::error::StoreError) -> Response {
    warn!(error = %e, "Record store read failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

/// Build the read-only record routes.
pub fn record_routes(store: Arc<dyn RecordStore>) -> Router {
    Router::new()
        .route(
            "/tenants/{tenant_id}/processed_logs",
            get(list_records),
        )
        .route(
            "/tenants/{tenant_id}/processed_logs/{log_id}",
            get(get_record),
        )
        .with_state(store)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ProcessingDelay;
    use crate::store::LibSqlRecordStore;

    async fn app() -> (Router, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> =
            Arc::new(LibSqlRecordStore::open_in_memory().await.unwrap());
        let worker = Arc::new(Worker::new(Arc::clone(&store), ProcessingDelay::none()));
        let app = push_routes(worker).merge(record_routes(Arc::clone(&store)));
        (app, store)
    }

    fn push_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn envelope(data: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "message": {"data": STANDARD.encode(data), "messageId": "77"},
            "subscription": "projects/p/subscriptions/worker",
        })
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn push_processes_and_read_api_serves_record() {
        let (app, _store) = app().await;
        let data = serde_json::json!({
            "tenant_id": "acme_corp",
            "log_id": "test-001",
            "text": "User 555-0199 accessed the system",
            "source": "json_upload",
            "received_at": "2024-05-01T10:00:00Z",
        });

        let resp = app
            .clone()
            .oneshot(push_request(envelope(data.to_string().as_bytes())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "processed");
        assert_eq!(body["log_id"], "test-001");

        let resp = app
            .clone()
            .oneshot(
                Request::get("/tenants/acme_corp/processed_logs/test-001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(
            body["record"]["modified_data"],
            "User [REDACTED] accessed the system"
        );

        let resp = app
            .oneshot(
                Request::get("/tenants/beta_inc/processed_logs/test-001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_envelope_is_acknowledged() {
        let (app, _store) = app().await;
        let resp = app
            .oneshot(push_request(serde_json::json!({"message": {"data": "%%%"}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "rejected");
    }

    #[tokio::test]
    async fn malformed_message_is_acknowledged() {
        let (app, store) = app().await;
        let resp = app
            .oneshot(push_request(envelope(br#"{"log_id":"x","text":"hi"}"#)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["error"], "missing tenant_id");
        assert_eq!(store.count_for_tenant("x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_defaults_and_clamps_limit() {
        let (app, _store) = app().await;
        for i in 0..3 {
            let data = serde_json::json!({
                "tenant_id": "acme",
                "log_id": format!("log-{i}"),
                "text": "hello",
                "source": "text_upload",
                "received_at": "2024-05-01T10:00:00Z",
            });
            let resp = app
                .clone()
                .oneshot(push_request(envelope(data.to_string().as_bytes())))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = app
            .clone()
            .oneshot(
                Request::get("/tenants/acme/processed_logs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["count"], 3);

        let resp = app
            .oneshot(
                Request::get("/tenants/acme/processed_logs?limit=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["count"], 1);
    }
}
