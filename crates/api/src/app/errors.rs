use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bookforge_infra::jobs::ProducerError;
use bookforge_infra::status::StatusStoreError;

pub fn producer_error_to_response(err: ProducerError) -> axum::response::Response {
    match err {
        ProducerError::Unavailable(msg) => {
            tracing::warn!(error = %msg, "broker unavailable at submit");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "generation service temporarily unavailable",
            )
        }
        ProducerError::Internal(msg) => {
            tracing::error!(error = %msg, "failed to queue task");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error while queueing task",
            )
        }
    }
}

pub fn status_error_to_response(err: StatusStoreError) -> axum::response::Response {
    tracing::error!(error = %err, "status query failed");
    match err {
        StatusStoreError::Unavailable(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "status_unavailable",
            "status service temporarily unavailable",
        ),
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "status_error", other.to_string()),
    }
}

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
