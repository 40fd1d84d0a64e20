//! `/info`, `/lb_check`, `/version`: instance introspection and liveness.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
struct InfoResponse {
    version: &'static str,
    supported_formats: Vec<&'static str>,
    requests: u64,
    errors: u64,
    find_requests: u64,
    find_errors: u64,
    cache_hits: u64,
    cache_misses: u64,
    backend_cache_hits: u64,
    backend_cache_misses: u64,
}

pub async fn info(State(state): State<Arc<AppState>>) -> Response {
    let m = &state.metrics;
    let mut supported_formats: Vec<&'static str> = state.config.supported_formats().into_iter().collect();
    supported_formats.sort_unstable();
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        supported_formats,
        requests: m.requests.load(Ordering::Relaxed),
        errors: m.errors.load(Ordering::Relaxed),
        find_requests: m.find_requests.load(Ordering::Relaxed),
        find_errors: m.find_errors.load(Ordering::Relaxed),
        cache_hits: m.cache_hits.load(Ordering::Relaxed),
        cache_misses: m.cache_misses.load(Ordering::Relaxed),
        backend_cache_hits: m.backend_cache_hits.load(Ordering::Relaxed),
        backend_cache_misses: m.backend_cache_misses.load(Ordering::Relaxed),
    })
    .into_response()
}

pub async fn lb_check() -> Response {
    (axum::http::StatusCode::OK, "").into_response()
}

pub async fn version() -> Response {
    env!("CARGO_PKG_VERSION").into_response()
}
