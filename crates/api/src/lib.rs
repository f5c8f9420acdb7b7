//! HTTP API: submission and status endpoints over the generation pipeline.

pub mod app;
pub mod context;
pub mod middleware;
