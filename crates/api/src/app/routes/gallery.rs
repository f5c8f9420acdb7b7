use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use bookforge_core::JobKind;

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/generate-images-async", get(ready).post(generate_images))
}

pub async fn ready() -> Json<dto::ReadyResponse> {
    Json(dto::ReadyResponse::new("Endpoint ready: POST to queue image generation"))
}

pub async fn generate_images(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Bytes,
) -> axum::response::Response {
    let submission = match common::enqueue(&services, &principal, JobKind::Image, &body).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(task_id) = submission.task_ids.first().copied() else {
        return crate::app::errors::json_error(
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
                "Task queued for generating {} images",
                submission.parameters.count
            ),
        }),
    )
        .into_response()
}
