use axum::{
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use bookforge_core::PrincipalId;

use crate::context::PrincipalContext;

/// Header set by the fronting proxy once it has authenticated the caller.
pub const PRINCIPAL_HEADER: &str = "x-forwarded-user";

pub async fn principal_middleware(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let principal = extract_principal(req.headers());
    req.extensions_mut().insert(PrincipalContext::new(principal));
    next.run(req).await
}

fn extract_principal(headers: &HeaderMap) -> PrincipalId {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(PrincipalId::new)
        .unwrap_or_else(PrincipalId::unknown)
}
