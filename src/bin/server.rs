//! carbonapi-rs server binary: loads configuration, wires up the function
//! registry, zipper client, caches and HTTP router, then serves until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::MatchedPath,
    http::{Request, StatusCode, Uri},
    Router,
};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestId, RequestId};
use tower_http::ServiceBuilderExt;
use tower_http::{
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info_span, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[cfg(all(target_env = "musl", target_pointer_width = "64"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

use carbonapi::api::{self, AppState};
use carbonapi::cache::build_cache;
use carbonapi::config::Config;
use carbonapi::eval::QueryEngine;
use carbonapi::metrics::ApiMetrics;
use carbonapi::registry::default_registry;
use carbonapi::zipper::ZipperClient;

#[derive(Clone, Default)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().simple().to_string();
        Some(RequestId::new(http::HeaderValue::from_str(&id).unwrap()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting carbonapi-rs");

    let config_path = std::env::var("CARBONAPI_CONFIG").unwrap_or_else(|_| "config.yaml".into());
    let config = Arc::new(Config::new(&config_path)?);

    let registry = default_registry();
    let backend_cache = build_cache(&config.backend_cache);
    let response_cache = build_cache(&config.response_cache);
    let zipper = Arc::new(ZipperClient::with_cache(
        &config.upstreams,
        Some(backend_cache),
        Duration::from_secs(config.backend_cache.default_timeout_sec),
    ));
    let engine = Arc::new(QueryEngine::new(registry, zipper, config.clone()));
    let metrics = Arc::new(ApiMetrics::default());

    let state = Arc::new(AppState {
        engine,
        config: config.clone(),
        metrics,
        response_cache,
    });

    let server_addr = config.get_socket_addr();

    // The pipeline-level timeout named in the concurrency design is enforced
    // per target inside `api::render::handle` via the zipper's own
    // `reqwest::Client` timeout plus the evaluation limiter, rather than a
    // blanket `tower_http` timeout layer here — the latter would need an
    // `Infallible`-producing error mapper to stay compatible with
    // `axum::Server::serve`, and a single slow target shouldn't fail targets
    // that already completed.
    let app: Router = api::router(state)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .set_x_request_id(UuidRequestId)
                .propagate_x_request_id()
                .layer(CatchPanicLayer::new())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|request: &Request<_>| {
                            let matched_path = request
                                .extensions()
                                .get::<MatchedPath>()
                                .map(MatchedPath::as_str);
                            info_span!(
                                "http_request",
                                method = ?request.method(),
                                matched_path,
                                uri = ?request.uri().path()
                            )
                        })
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(LatencyUnit::Micros),
                        ),
                ),
        );

    tracing::info!("listening on {}", server_addr);
    axum::Server::bind(&server_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("stopped carbonapi-rs");
    Ok(())
}

async fn not_found(uri: Uri) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("no route for {uri}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
