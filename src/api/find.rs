//! `/metrics/find`: tree-walking metric-name autocomplete.
//!
//! The only backend protocol this crate speaks is the render endpoint
//! ([`crate::zipper`]), so discovery is implemented by rendering the
//! requested glob against every shard and deriving the next path segment
//! from each matching series' full name, rather than by speaking a
//! dedicated find wire format the backend may not expose uniformly.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use crate::metricdata::FetchRequest;

use super::AppState;

#[derive(Serialize)]
struct FindNode {
    name: String,
    path: String,
    #[serde(rename = "is_leaf")]
    is_leaf: bool,
}

pub async fn find(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(query) = params.get("query").cloned() else {
        state.metrics.record_find(StatusCode::BAD_REQUEST.as_u16());
        return (StatusCode::BAD_REQUEST, "missing query parameter").into_response();
    };
    let depth = query.matches('.').count();

    let req = FetchRequest {
        name: query.clone(),
        path_expression: query.clone(),
        start_time: 0,
        stop_time: 0,
        max_data_points: None,
        filter_functions: vec![],
    };

    match state.engine.zipper.do_query_to_all(&req).await {
        Ok(series) => {
            let mut nodes: BTreeSet<(String, bool)> = BTreeSet::new();
            for s in series {
                let full = s.tags.get("name").cloned().unwrap_or(s.name);
                let segments: Vec<&str> = full.split('.').collect();
                if segments.len() <= depth {
                    continue;
                }
                let path = segments[..=depth].join(".");
                let is_leaf = segments.len() == depth + 1;
                nodes.insert((path, is_leaf));
            }
            let out: Vec<FindNode> = nodes
                .into_iter()
                .map(|(path, is_leaf)| {
                    let name = path.rsplit('.').next().unwrap_or(&path).to_string();
                    FindNode { name, path, is_leaf }
                })
                .collect();
            state.metrics.record_find(StatusCode::OK.as_u16());
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => {
            state.metrics.record_find(e.status.as_u16());
            (e.status, e.message).into_response()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn find_node_serializes_is_leaf_snake_case() {
        let n = FindNode {
            name: "bar".into(),
            path: "foo.bar".into(),
            is_leaf: true,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["is_leaf"], true);
    }
}
