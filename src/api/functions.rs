//! `/functions` and `/functions/:name`: function-catalog introspection.
//!
//! Params: `grouped=1` nests descriptions by group, `nativeOnly=1` drops
//! functions flagged `proxied` (delegated upstream rather than implemented
//! here); requesting a specific proxied function with `nativeOnly=1` is an
//! error, not a silent filter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::registry::FunctionDescription;

use super::AppState;

fn native_only(params: &HashMap<String, String>) -> bool {
    params.get("nativeOnly").map(|v| v == "1").unwrap_or(false)
}

fn grouped(params: &HashMap<String, String>) -> bool {
    params.get("grouped").map(|v| v == "1").unwrap_or(false)
}

pub async fn functions(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let native_only = native_only(&params);

    if grouped(&params) {
        let mut grouped_descs = state.engine.registry.descriptions_grouped();
        if native_only {
            drop_proxied_grouped(&mut grouped_descs);
        }
        Json(grouped_descs).into_response()
    } else {
        let mut descs = state.engine.registry.descriptions();
        if native_only {
            descs.retain(|_, d| !d.proxied);
        }
        Json(descs).into_response()
    }
}

pub async fn function_detail(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let descs = state.engine.registry.descriptions();
    let Some(desc) = descs.get(&name) else {
        return (StatusCode::NOT_FOUND, format!("unknown function {name}")).into_response();
    };
    if native_only(&params) && desc.proxied {
        return (
            StatusCode::BAD_REQUEST,
            format!("{name} is proxied to an upstream and nativeOnly was specified"),
        )
            .into_response();
    }
    Json(desc.clone()).into_response()
}

fn drop_proxied_grouped(grouped: &mut BTreeMap<String, BTreeMap<String, FunctionDescription>>) {
    for group in grouped.values_mut() {
        group.retain(|_, d| !d.proxied);
    }
    grouped.retain(|_, group| !group.is_empty());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::default_registry;

    #[test]
    fn drop_proxied_grouped_removes_empty_groups() {
        let registry = default_registry();
        let mut grouped = registry.descriptions_grouped();
        let total_before: usize = grouped.values().map(|g| g.len()).sum();
        drop_proxied_grouped(&mut grouped);
        let total_after: usize = grouped.values().map(|g| g.len()).sum();
        assert!(total_after <= total_before);
    }
}
