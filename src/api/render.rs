//! C7: the `/render` request pipeline — parse, validate, cache, evaluate,
//! merge errors, serialize.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::{merge_errors, CarbonApiError};
use crate::metricdata::MetricData;
use crate::serialize::{self, Format};

use super::time::{parse_time, truncate};
use super::AppState;

#[derive(Default, Debug, Clone)]
struct RenderParams {
    targets: Vec<String>,
    from: String,
    until: String,
    format: String,
    max_data_points: Option<usize>,
    no_null_points: bool,
    no_cache: bool,
}

fn parse_params(raw: &str) -> RenderParams {
    let mut params = RenderParams {
        from: "-24h".to_string(),
        until: "now".to_string(),
        format: "json".to_string(),
        ..Default::default()
    };
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).unwrap_or_default();
    for (k, v) in pairs {
        match k.as_str() {
            "target" => params.targets.push(v),
            "from" => params.from = v,
            "until" => params.until = v,
            "format" => params.format = v,
            "maxDataPoints" => params.max_data_points = v.parse().ok(),
            "noNullPoints" => params.no_null_points = v == "1" || v.eq_ignore_ascii_case("true"),
            "noCache" => params.no_cache = v == "1" || v.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
    params
}

fn cache_key(params: &RenderParams, from: i64, until: i64) -> String {
    let mut targets = params.targets.clone();
    targets.sort();
    let canonical = format!(
        "rc:{}:{}:{}:{}:{}:{}",
        targets.join(","),
        from,
        until,
        params.format,
        params.max_data_points.unwrap_or(0),
        params.no_null_points
    );
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("rc:{:016x}", hasher.finish())
}

/// A panicking function implementation must not take the whole server down;
/// [`tower_http::catch_panic::CatchPanicLayer`] wraps this handler (see
/// `src/bin/server.rs`) and turns an unwind into a 500 response, so the body
/// here can stay a straight-line async function.
pub async fn render(State(state): State<Arc<AppState>>, RawQuery(raw): RawQuery) -> Response {
    let raw = raw.unwrap_or_default();
    let params = parse_params(&raw);
    handle(&state, &params).await
}

async fn handle(state: &Arc<AppState>, params: &RenderParams) -> Response {
    let now = chrono::Utc::now().timestamp();

    let format = match Format::parse(&params.format) {
        Some(f) => f,
        None => {
            if serialize::is_recognized_but_unimplemented(&params.format) {
                return error_response(
                    state,
                    uuid::Uuid::new_v4(),
                    StatusCode::NOT_IMPLEMENTED,
                    vec![format!("format {} is recognized but not implemented", params.format)],
                    false,
                );
            }
            return error_response(
                state,
                uuid::Uuid::new_v4(),
                StatusCode::BAD_REQUEST,
                vec![format!("unsupported format: {}", params.format)],
                false,
            );
        }
    };
    if !state.config.supported_formats().contains(format_name(format)) {
        return error_response(
            state,
            uuid::Uuid::new_v4(),
            StatusCode::NOT_IMPLEMENTED,
            vec![format!("format {} is not enabled", params.format)],
            false,
        );
    }

    if params.targets.is_empty() {
        return error_response(
            state,
            uuid::Uuid::new_v4(),
            StatusCode::BAD_REQUEST,
            vec!["no target specified".to_string()],
            false,
        );
    }

    let total_len: usize = params.targets.iter().map(|t| t.len()).sum();
    if total_len > state.config.max_query_length {
        return error_response(
            state,
            uuid::Uuid::new_v4(),
            StatusCode::BAD_REQUEST,
            vec!["target length exceeds max_query_length".to_string()],
            false,
        );
    }

    let from = match parse_time(&params.from, now) {
        Ok(v) => truncate(v, state.config.truncate_time_sec),
        Err(e) => return error_response(state, uuid::Uuid::new_v4(), e.status, vec![e.message], false),
    };
    let until = match parse_time(&params.until, now) {
        Ok(v) => truncate(v, state.config.truncate_time_sec),
        Err(e) => return error_response(state, uuid::Uuid::new_v4(), e.status, vec![e.message], false),
    };
    if from >= until {
        return error_response(
            state,
            uuid::Uuid::new_v4(),
            StatusCode::BAD_REQUEST,
            vec!["from must be before until".to_string()],
            false,
        );
    }

    let key = cache_key(params, from, until);
    if !params.no_cache {
        if let Some(cached) = state.response_cache.get(&key).await {
            state.metrics.cache_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return ok_response(format, cached, uuid::Uuid::new_v4(), true);
        }
    }
    state.metrics.cache_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    // Fetches are deduped across every target in this request regardless of
    // `combine_multiple_targets_in_one`; that flag only governs whether a
    // failure is attributed to the target that caused it (C7 step 10).
    let results = state.engine.fetch_and_eval_all(&params.targets, from, until).await;

    let mut all_series: Vec<MetricData> = Vec::new();
    let mut errors: Vec<CarbonApiError> = Vec::new();
    if state.config.combine_multiple_targets_in_one {
        for result in results {
            match result {
                Ok(series) => all_series.extend(series),
                Err(e) => errors.push(e),
            }
        }
    } else {
        for (target, result) in params.targets.iter().zip(results) {
            match result {
                Ok(series) => all_series.extend(series),
                Err(e) => errors.push(e.with_context("target", target.clone())),
            }
        }
    }

    // Fail the whole request when nothing succeeded, or when something
    // failed and `require_success_all` demands every target succeed (C7
    // step 11); a clean, error-free empty result (e.g. every target's glob
    // missed) still serializes as a normal 200 below.
    if !errors.is_empty() && (all_series.is_empty() || state.config.require_success_all) {
        let (status, messages) = merge_errors(&errors);
        let status = remap_not_found(status, state);
        state.metrics.record_render(status.as_u16());
        return error_response(state, uuid::Uuid::new_v4(), status, messages, false);
    }

    let no_null_points = format == Format::Json && params.no_null_points;
    let body = match serialize::serialize(format, &all_series, params.max_data_points, no_null_points) {
        Ok(b) => b,
        Err(e) => {
            state.metrics.record_render(e.status.as_u16());
            return error_response(state, uuid::Uuid::new_v4(), e.status, vec![e.message], false);
        }
    };

    if !params.no_cache {
        let ttl = crate::cache::response_ttl(&state.config.response_cache, until, now);
        state.response_cache.set(&key, body.clone(), ttl).await;
    }

    state.metrics.record_render(200);
    ok_response(format, body, uuid::Uuid::new_v4(), false)
}

fn format_name(format: Format) -> &'static str {
    match format {
        Format::Json => "json",
        Format::Raw => "raw",
        Format::Csv => "csv",
        Format::Pickle => "pickle",
        Format::ProtobufV2 => "carbonapi_v2_pb",
        Format::ProtobufV3 => "carbonapi_v3_pb",
    }
}

fn remap_not_found(status: StatusCode, state: &AppState) -> StatusCode {
    if status == StatusCode::NOT_FOUND {
        StatusCode::from_u16(state.config.not_found_status_code).unwrap_or(StatusCode::NOT_FOUND)
    } else {
        status
    }
}

fn ok_response(format: Format, body: Vec<u8>, request_id: uuid::Uuid, cached: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_static(format.content_type()),
    );
    headers.insert(
        "x-carbonapi-request-cached",
        HeaderValue::from_static(if cached { "true" } else { "false" }),
    );
    if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert("x-carbonapi-uuid", v);
    }
    (StatusCode::OK, headers, body).into_response()
}

fn error_response(
    state: &AppState,
    request_id: uuid::Uuid,
    status: StatusCode,
    messages: Vec<String>,
    _cached: bool,
) -> Response {
    let status = if status == StatusCode::NOT_FOUND {
        remap_not_found(status, state)
    } else {
        status
    };
    state.metrics.record_render(status.as_u16());
    let body = if state.config.http_response_stack_trace {
        messages.join("; ")
    } else {
        status.canonical_reason().unwrap_or("error").to_string()
    };
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert("x-carbonapi-uuid", v);
    }
    (status, headers, body).into_response()
}
