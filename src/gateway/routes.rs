//! Gateway HTTP endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use super::ingest::Gateway;
use super::normalize::TENANT_HEADER;
use crate::error::Error;

/// POST /ingest
///
/// 202 once the broker has the message, 400 on validation failure,
/// 500 when publishing failed.
async fn ingest(State(gateway): State<Arc<Gateway>>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let tenant = headers.get(TENANT_HEADER).map(|v| v.as_bytes());

    match gateway.accept(content_type, tenant, &body).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(Error::Validation(e)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy"}))
}

/// GET /
async fn service_info() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "ingest": "POST /ingest",
            "health": "GET /health",
        },
    }))
}

/// Build the gateway routes.
pub fn gateway_routes(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .with_state(gateway)
}
