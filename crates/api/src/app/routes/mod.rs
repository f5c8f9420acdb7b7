use axum::Router;

pub mod common;
pub mod gallery;
pub mod library;
pub mod system;

/// Router for the submission and status endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/library", library::router())
        .nest("/gallery", gallery::router())
}
