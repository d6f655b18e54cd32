//! # REST API
//!
//! HTTP surface for the pipeline. Routes live under `/api/v1`:
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET  | `/health` | [`handlers::health`] |
//! | GET  | `/models` | [`handlers::models`] |
//! | POST | `/predict` | [`handlers::predict`] |
//! | POST | `/predict/batch` | [`handlers::predict_batch`] |
//! | POST | `/predict/csv` | [`handlers::predict_csv`] |
//! | POST | `/explain` | [`handlers::explain`] |
//! | POST | `/recommend` | [`handlers::recommend`] |
//! | GET  | `/template` | [`handlers::template_csv`] |
//! | GET  | `/template/json` | [`handlers::template_json`] |
//!
//! Middleware, outermost first: trace, CORS, body limit, rate limit.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod types;

use crate::config::ServerConfig;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use loanlens_core::Pipeline;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub max_batch: usize,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: Pipeline, config: &ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            max_batch: config.max_batch,
        }
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::models))
        .route("/predict", post(handlers::predict))
        .route("/predict/batch", post(handlers::predict_batch))
        .route("/predict/csv", post(handlers::predict_csv))
        .route("/explain", post(handlers::explain))
        .route("/recommend", post(handlers::recommend))
        .route("/template", get(handlers::template_csv))
        .route("/template/json", get(handlers::template_json))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the full router with its middleware stack.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .nest("/api/v1", api_routes())
        .fallback(handlers::not_found);

    if let Some(limiter) = rate_limit::limiter(config.rate_limit_per_second) {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit::limit));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.cors_origins))
                .layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: ServerConfig, pipeline: Pipeline) -> std::io::Result<()> {
    let info = pipeline.model_info();
    let app = build_router(AppState::new(pipeline, &config), &config);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    tracing::info!(
        %addr,
        models = ?info.available_models,
        default_model = %info.default_model,
        explainer = %info.explainer,
        rate_limit = config.rate_limit_per_second,
        "LoanLens API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("LoanLens API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
