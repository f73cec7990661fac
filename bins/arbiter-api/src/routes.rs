use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use axum::http::HeaderValue;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::handlers;
use crate::AppState;

/// Source (1MB) plus custom input (10MB) plus JSON overhead
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

/// Browser clients call the API cross-origin; `None` allows any origin
fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = origins else {
        return CorsLayer::permissive();
    };

    let parsed: Result<Vec<HeaderValue>, _> = origins.iter().map(|o| o.parse()).collect();
    match parsed {
        Ok(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(error = %e, "Invalid CORS origin, allowing any origin");
            CorsLayer::permissive()
        }
    }
}

/// Build the application router; API routes live under `base_path`
pub fn app(state: Arc<AppState>, base_path: &str, cors_origins: Option<&[String]>) -> Router {
    let api = Router::new()
        .route("/challenges/search/id", get(handlers::get_challenge))
        .route("/challenges/evaluate", post(handlers::evaluate))
        .route("/languages", get(handlers::list_languages));

    let api = if base_path.is_empty() {
        api
    } else {
        Router::new().nest(base_path, api)
    };

    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}
