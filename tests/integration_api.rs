//! End-to-end HTTP tests against the assembled router, exercising the same
//! `tower::Service` the binary serves, with a mocked backend cluster.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper::body::to_bytes;
use tower::ServiceExt;

use carbonapi::api::{self, AppState};
use carbonapi::cache::build_cache;
use carbonapi::config::Config;
use carbonapi::eval::QueryEngine;
use carbonapi::metrics::ApiMetrics;
use carbonapi::registry::default_registry;
use carbonapi::zipper::ZipperClient;

fn config_with_upstream(upstream: &str) -> Config {
    let yaml = format!(
        "
server:
  port: 8080
upstreams:
  servers:
    - '{upstream}'
  max_tries: 1
response_cache:
  type: null
backend_cache:
  type: null
",
    );
    Config::from_config_str(&yaml)
}

fn config_with_require_success_all(upstream: &str, require_all: bool) -> Config {
    let yaml = format!(
        "
server:
  port: 8080
upstreams:
  servers:
    - '{upstream}'
  max_tries: 1
require_success_all: {require_all}
response_cache:
  type: null
backend_cache:
  type: null
",
    );
    Config::from_config_str(&yaml)
}

fn build_state(config: Config) -> Arc<AppState> {
    let config = Arc::new(config);
    let registry = default_registry();
    let response_cache = build_cache(&config.response_cache);
    let zipper = Arc::new(ZipperClient::with_cache(&config.upstreams, None, Duration::from_secs(60)));
    let engine = Arc::new(QueryEngine::new(registry, zipper, config.clone()));
    Arc::new(AppState {
        engine,
        config,
        metrics: Arc::new(ApiMetrics::default()),
        response_cache,
    })
}

#[tokio::test]
async fn render_round_trips_a_simple_target_through_json() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"servers.web1.cpu","datapoints":[[1.0,0],[2.0,60]],"start":0,"step":60}]"#)
        .create_async()
        .await;

    let state = build_state(config_with_upstream(&server.url()));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=servers.web1.cpu&from=0&until=120&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed[0]["target"], "servers.web1.cpu");
}

#[tokio::test]
async fn render_applies_a_wrapping_function() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"servers.web1.cpu","datapoints":[[1.0,0],[3.0,60]],"start":0,"step":60}]"#)
        .create_async()
        .await;

    let state = build_state(config_with_upstream(&server.url()));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=scale(servers.web1.cpu,2)&from=0&until=120&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed[0]["datapoints"][0][0], 2.0);
    assert_eq!(parsed[0]["datapoints"][1][0], 6.0);
}

#[tokio::test]
async fn render_dedupes_a_metric_shared_across_targets() {
    let mut server = mockito::Server::new_async().await;
    // exactly one hit expected: two targets below both reference
    // `servers.web1.cpu`, so a correct dedup fetches it once for the request.
    let m = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"servers.web1.cpu","datapoints":[[1.0,0],[2.0,60]],"start":0,"step":60}]"#)
        .create_async()
        .await;

    let state = build_state(config_with_upstream(&server.url()));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=servers.web1.cpu&target=scale(servers.web1.cpu,2)&from=0&until=120&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    m.assert_async().await;
}

#[tokio::test]
async fn render_treats_backend_404_as_empty_success() {
    let mut server = mockito::Server::new_async().await;
    let _m = server.mock("GET", mockito::Matcher::Any).with_status(404).create_async().await;

    let state = build_state(config_with_upstream(&server.url()));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=servers.*.cpu&from=0&until=60&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn render_without_require_success_all_returns_partial_results() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
        .mock("GET", mockito::Matcher::Any)
        .match_query(mockito::Matcher::UrlEncoded("target".into(), "good.metric".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"good.metric","datapoints":[[1.0,0]],"start":0,"step":60}]"#)
        .create_async()
        .await;
    let _bad = server
        .mock("GET", mockito::Matcher::Any)
        .match_query(mockito::Matcher::UrlEncoded("target".into(), "bad.metric".into()))
        .with_status(403)
        .create_async()
        .await;

    let state = build_state(config_with_require_success_all(&server.url(), false));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=good.metric&target=bad.metric&from=0&until=60&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0]["target"], "good.metric");
}

#[tokio::test]
async fn render_require_success_all_fails_the_whole_request_on_partial_failure() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
        .mock("GET", mockito::Matcher::Any)
        .match_query(mockito::Matcher::UrlEncoded("target".into(), "good.metric".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"good.metric","datapoints":[[1.0,0]],"start":0,"step":60}]"#)
        .create_async()
        .await;
    let _bad = server
        .mock("GET", mockito::Matcher::Any)
        .match_query(mockito::Matcher::UrlEncoded("target".into(), "bad.metric".into()))
        .with_status(403)
        .create_async()
        .await;

    let state = build_state(config_with_require_success_all(&server.url(), true));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=good.metric&target=bad.metric&from=0&until=60&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn render_rejects_missing_target_with_bad_request() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/render?from=0&until=60").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn render_rejects_unsupported_format() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=a.b&format=nonsense")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn render_reports_backend_unreachable_as_service_unavailable_family() {
    // no upstream listening at all; `do_query` should exhaust retries cleanly
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/render?target=a.b&from=0&until=60")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error() || response.status().is_server_error());
}

#[tokio::test]
async fn metrics_find_walks_one_path_segment_at_a_time() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"servers.web1.cpu","datapoints":[],"start":0,"step":60},{"target":"servers.web2.cpu","datapoints":[],"start":0,"step":60}]"#)
        .create_async()
        .await;

    let state = build_state(config_with_upstream(&server.url()));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/metrics/find?query=servers.*").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = parsed.as_array().unwrap().iter().map(|n| n["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["web1", "web2"]);
    assert_eq!(parsed[0]["is_leaf"], false);
}

#[tokio::test]
async fn tags_extracts_values_for_the_requested_tag() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"target":"servers.web1.cpu;dc=ams;host=web1","datapoints":[],"start":0,"step":60}]"#)
        .create_async()
        .await;

    let state = build_state(config_with_upstream(&server.url()));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/tags?tag=dc").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tags_without_a_tag_param_is_a_bad_request() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/tags").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn functions_lists_the_built_in_catalog() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/functions").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(parsed.get("scale").is_some());
}

#[tokio::test]
async fn function_detail_404s_for_an_unknown_name() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/functions/doesNotExist").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn info_reports_counters_and_supported_formats() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(parsed["supported_formats"].as_array().unwrap().contains(&serde_json::json!("json")));
}

#[tokio::test]
async fn lb_check_and_version_respond_ok() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/lb_check").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let state = build_state(config_with_upstream("http://127.0.0.1:1"));
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
