//! HTTP surface: router assembly and the individual endpoint handlers.

pub mod find;
pub mod functions;
pub mod misc;
pub mod render;
pub mod tags;
pub mod time;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::cache::Cache;
use crate::config::Config;
use crate::eval::QueryEngine;
use crate::metrics::ApiMetrics;

pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub config: Arc<Config>,
    pub metrics: Arc<ApiMetrics>,
    pub response_cache: Arc<dyn Cache>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/render", get(render::render).post(render::render))
        .route("/render/", get(render::render).post(render::render))
        .route("/metrics/find", get(find::find).post(find::find))
        .route("/metrics/find/", get(find::find).post(find::find))
        .route("/tags", get(tags::tags))
        .route("/tags/autoComplete/tags", get(tags::auto_complete_tags))
        .route("/functions", get(functions::functions))
        .route("/functions/:name", get(functions::function_detail))
        .route("/info", get(misc::info))
        .route("/lb_check", get(misc::lb_check))
        .route("/version", get(misc::version))
        .with_state(state)
}
