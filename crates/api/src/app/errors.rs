use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fetchgate_infra::store::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Store failures that leak to a handler. Conflicts never reach here: every
/// handler resolves them as idempotent no-ops before responding.
pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("no job {id}"))
        }
        StoreError::Conflict { .. } | StoreError::IllegalTransition { .. } => json_error(
            StatusCode::CONFLICT,
            "conflict",
            "job changed concurrently, retry",
        ),
        StoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}
