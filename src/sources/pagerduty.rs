use crate::sources::ValidationError;
use axum::http::HeaderMap;
use incident_core::events::WebhookPayload;
use incident_core::signatures::{SignatureError, verify_signature};

pub const SIGNATURE_HEADER: &str = "X-PagerDuty-Signature";

pub fn validate(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), ValidationError> {
    let signature = header_string(headers, SIGNATURE_HEADER);

    verify_signature(secret, body, signature.as_deref()).map_err(|error| match error {
        SignatureError::Missing => ValidationError::Unauthorized("missing pagerduty signature"),
        SignatureError::Mismatch => ValidationError::Unauthorized("invalid pagerduty signature"),
    })
}

pub fn decode(body: &[u8]) -> Result<WebhookPayload, ValidationError> {
    WebhookPayload::decode(body).map_err(|error| ValidationError::BadRequest(error.to_string()))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
