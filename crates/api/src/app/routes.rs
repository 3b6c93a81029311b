use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value as JsonValue;
use tracing::error;

use fetchgate_core::{JobId, JobStatus, VendorKind};
use fetchgate_infra::reconcile::ReconcileOutcome;
use fetchgate_infra::store::JobUpdate;

use crate::app::{dto, errors, AppContext};

/// `POST /jobs` — accept an arbitrary JSON object as the job payload.
///
/// An optional top-level `"vendor"` key (`"sync"` | `"async"`, default
/// `"sync"`) selects the vendor variant and is stripped from the stored
/// payload. Responds `202` with the opaque id the client polls.
pub async fn create_job(
    Extension(context): Extension<AppContext>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let JsonValue::Object(mut payload) = body else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "request body must be a JSON object",
        );
    };

    let vendor = match payload.remove("vendor") {
        None => VendorKind::Sync,
        Some(JsonValue::String(s)) => match s.parse::<VendorKind>() {
            Ok(v) => v,
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "vendor must be \"sync\" or \"async\"",
                );
            }
        },
        Some(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "vendor must be a string",
            );
        }
    };

    let job = match context
        .store
        .create(JsonValue::Object(payload), vendor)
        .await
    {
        Ok(job) => job,
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = context.queue.enqueue(job.id).await {
        // No worker will ever see this record; fail it so polling clients
        // get a terminal answer instead of an eternal `pending`. A Conflict
        // here would mean something else already moved the job on, which is
        // fine either way.
        error!(job_id = %job.id, error = %e, "enqueue failed after create");
        let _ = context
            .store
            .update_if(
                job.id,
                JobStatus::Pending,
                JobUpdate::failed(format!("enqueue failed: {e}")),
            )
            .await;
        return errors::json_error(StatusCode::BAD_GATEWAY, "queue_error", e.to_string());
    }

    (
        StatusCode::ACCEPTED,
        Json(dto::CreateJobResponse { request_id: job.id }),
    )
        .into_response()
}

/// `GET /jobs/{id}` — current status plus result/error when terminal.
pub async fn get_job(
    Extension(context): Extension<AppContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
        }
    };

    match context.store.get(id).await {
        Ok(Some(job)) => Json(dto::JobStatusResponse::from(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("no job {id}")),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /vendor-webhook/{vendor}` — async vendor result callback.
///
/// Idempotent: duplicates and callbacks that lost to the timeout sweep get
/// `200` without mutation, so the vendor stops retrying. `404` only when the
/// job id does not exist at all.
pub async fn vendor_webhook(
    Extension(context): Extension<AppContext>,
    Path(vendor): Path<String>,
    Json(body): Json<dto::WebhookRequest>,
) -> axum::response::Response {
    if vendor.parse::<VendorKind>().is_err() {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "unknown_vendor",
            format!("no vendor {vendor}"),
        );
    }

    let job_id: JobId = match body.job_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
        }
    };

    match context.reconciler.apply(job_id, &body.data).await {
        Ok(ReconcileOutcome::Completed) | Ok(ReconcileOutcome::AlreadySettled) => {
            Json(serde_json::json!({"status": "ok"})).into_response()
        }
        Ok(ReconcileOutcome::NotFound) => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("no job {job_id}"))
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `GET /health` — liveness probe.
pub async fn health() -> axum::response::Response {
    Json(serde_json::json!({"status": "ok"})).into_response()
}
