//! Turn an inbound HTTP request into an [`IngestRequest`].
//!
//! Pure: no I/O, no clock beyond stamping `received_at`.

use serde::Deserialize;

use crate::error::ValidationError;
use crate::model::{IngestRequest, Source, is_valid_identifier};

/// Header carrying the tenant for plain-text uploads.
pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Deserialize)]
struct JsonUpload {
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    log_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// `application/json` and structured-syntax `+json` types, parameters ignored.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Validate and normalize one request.
///
/// JSON bodies must be an object with non-blank `tenant_id` and non-empty
/// `text`; identifiers are kept exactly as sent. Every other content type is
/// treated as plain text with the tenant taken from the raw `X-Tenant-ID`
/// value, which must be UTF-8. A missing or blank `log_id` gets a fresh UUID.
pub fn normalize(
    content_type: Option<&str>,
    tenant_header: Option<&[u8]>,
    body: &[u8],
) -> Result<IngestRequest, ValidationError> {
    if content_type.is_some_and(is_json_content_type) {
        normalize_json(body)
    } else {
        normalize_text(tenant_header, body)
    }
}

fn normalize_json(body: &[u8]) -> Result<IngestRequest, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| ValidationError::MalformedPayload)?;
    if !value.is_object() {
        return Err(ValidationError::MalformedPayload);
    }
    let upload: JsonUpload =
        serde_json::from_value(value).map_err(|_| ValidationError::MalformedPayload)?;

    let tenant_id = upload
        .tenant_id
        .filter(|t| !t.trim().is_empty())
        .ok_or(ValidationError::MissingTenantId)?;
    check_identifier(&tenant_id, "tenant_id")?;

    let log_id = upload.log_id.filter(|l| !l.trim().is_empty());
    if let Some(log_id) = &log_id {
        check_identifier(log_id, "log_id")?;
    }

    let text = upload
        .text
        .filter(|t| !t.is_empty())
        .ok_or(ValidationError::MissingText)?;

    Ok(IngestRequest::new(tenant_id, log_id, text, Source::JsonUpload))
}

fn normalize_text(
    tenant_header: Option<&[u8]>,
    body: &[u8],
) -> Result<IngestRequest, ValidationError> {
    let raw = tenant_header.ok_or(ValidationError::MissingTenantHeader)?;
    let tenant_id = std::str::from_utf8(raw)
        .map_err(|_| ValidationError::MalformedPayload)?
        .trim();
    if tenant_id.is_empty() {
        return Err(ValidationError::MissingTenantHeader);
    }
    check_identifier(tenant_id, "tenant_id")?;

    let text = std::str::from_utf8(body).map_err(|_| ValidationError::MalformedPayload)?;
    if text.is_empty() {
        return Err(ValidationError::MissingText);
    }

    Ok(IngestRequest::new(tenant_id, None, text, Source::TextUpload))
}

fn check_identifier(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier { field })
    }
}
