use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use bookforge_core::{JobKind, TaskId};

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/generate-async", get(ready).post(generate_books))
        .route("/generate-large-books", post(generate_large_books))
        .route("/tasks/status", get(tasks_status))
        .route("/tasks/status/:task_id", get(task_status))
}

pub async fn ready() -> Json<dto::ReadyResponse> {
    Json(dto::ReadyResponse::new("Endpoint ready: POST to queue book generation"))
}

pub async fn generate_books(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Bytes,
) -> axum::response::Response {
    let submission = match common::enqueue(&services, &principal, JobKind::Book, &body).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(task_id) = submission.task_ids.first().copied() else {
        return errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "no task was queued",
        );
    };

    (
        StatusCode::ACCEPTED,
        Json(dto::QueuedResponse {
            status: "queued".to_string(),
            task_id,
            message: format!(
                "Task queued for generating {} books",
                submission.parameters.count
            ),
        }),
    )
        .into_response()
}

pub async fn generate_large_books(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Bytes,
) -> axum::response::Response {
    let submission =
        match common::enqueue(&services, &principal, JobKind::LargeBook, &body).await {
            Ok(s) => s,
            Err(resp) => return resp,
        };

    (
        StatusCode::ACCEPTED,
        Json(dto::QueuedBatchResponse {
            status: "queued".to_string(),
            message: format!(
                "Queued {} large book tasks of {} words",
                submission.task_ids.len(),
                submission.parameters.word_count
            ),
            tasks: submission.task_ids,
            queue: submission.lane.name().to_string(),
            not_enqueued: submission.not_enqueued,
        }),
    )
        .into_response()
}

pub async fn tasks_status(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.tracker().report().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::status_error_to_response(e),
    }
}

pub async fn task_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match task_id.parse() {
        Ok(id) => id,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_task_id", e.to_string());
        }
    };

    match services.tracker().get(task_id).await {
        Ok(Some(record)) => Json(dto::TaskStatusResponse { task_id, record }).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "task not found"),
        Err(e) => errors::status_error_to_response(e),
    }
}
