//! `/tags` and `/tags/autoComplete/tags`: tag-value discovery against the
//! upstream cluster. This is the authoritative handler for both routes — it
//! is the one that increments the `Find*` counter family, resolving the
//! donor's duplicated-handler ambiguity in favor of always recording finds
//! under the find family rather than the render family.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::metricdata::FetchRequest;

use super::AppState;

pub async fn tags(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    respond(&state, params.get("tag").cloned(), params.get("valuePrefix").cloned()).await
}

pub async fn auto_complete_tags(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    respond(&state, params.get("tag").cloned(), params.get("valuePrefix").cloned()).await
}

async fn respond(state: &Arc<AppState>, tag: Option<String>, value_prefix: Option<String>) -> Response {
    let Some(tag) = tag else {
        state.metrics.record_find(StatusCode::BAD_REQUEST.as_u16());
        return (StatusCode::BAD_REQUEST, "missing tag parameter").into_response();
    };

    let pattern = format!("seriesByTag('{}=~{}.*')", tag, value_prefix.clone().unwrap_or_default());
    let req = FetchRequest {
        name: pattern.clone(),
        path_expression: pattern,
        start_time: 0,
        stop_time: 0,
        max_data_points: None,
        filter_functions: vec![],
    };

    match state.engine.zipper.do_query_to_all(&req).await {
        Ok(series) => {
            let mut values: Vec<String> = series
                .into_iter()
                .filter_map(|s| s.tags.get(&tag).cloned())
                .collect();
            values.sort();
            values.dedup();
            state.metrics.record_find(StatusCode::OK.as_u16());
            (StatusCode::OK, Json(values)).into_response()
        }
        Err(e) => {
            state.metrics.record_find(e.status.as_u16());
            (e.status, e.message).into_response()
        }
    }
}
