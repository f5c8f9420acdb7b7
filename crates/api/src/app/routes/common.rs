use axum::body::Bytes;

use bookforge_core::{JobKind, SubmitParams};
use bookforge_infra::jobs::Submission;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// Parse the (optional) JSON body leniently and hand it to the producer.
pub async fn enqueue(
    services: &AppServices,
    principal: &PrincipalContext,
    kind: JobKind,
    body: &Bytes,
) -> Result<Submission, axum::response::Response> {
    let params = SubmitParams::from_body(body);
    tracing::info!(
        kind = %kind,
        submitted_by = %principal.principal_id(),
        "queueing generation task"
    );
    services
        .producer()
        .submit(kind, &params, principal.principal_id())
        .await
        .map_err(errors::producer_error_to_response)
}
