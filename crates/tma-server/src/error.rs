use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

use tma_core::{errors::Error, journal::ErrorJournal};

/// Translate a failure into the wire error shape.
///
/// Unexpected failures are appended to the error journal before
/// translation; the journal write is diagnostic only and never changes
/// the response.
pub fn error_response(
    journal: &ErrorJournal,
    context: &str,
    err: Error,
) -> (StatusCode, Json<Value>) {
    let (code, status) = classify(&err);
    if code == StatusCode::INTERNAL_SERVER_ERROR {
        journal.record(context, &err);
    }
    tracing::warn!(context, status, error = %err, "request failed");
    (
        code,
        Json(json!({ "status": status, "detail": err.to_string() })),
    )
}

/// Error taxonomy → HTTP mapping: client-correctable session problems
/// are 400, retryable proxy/timeout problems are 502, malformed input
/// is 422, everything else is opaque.
fn classify(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
        Error::SessionInvalid(_) => (StatusCode::BAD_REQUEST, "session_invalid"),
        Error::Proxy(_) => (StatusCode::BAD_GATEWAY, "proxy_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
    }
}
