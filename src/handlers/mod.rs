use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

pub mod redirect;
pub mod rpc;

/// Public redirect server: `/health` and `/:code`.
pub fn redirect_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        // Liveness probe, no store round trip
        .route("/health", get(|| async { StatusCode::OK }))
        // Short-link redirect; must come last so fixed routes take priority
        .route("/:code", get(redirect::redirect))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// RPC API: one `POST /rpc/{Operation}` route per operation.
pub fn rpc_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/rpc/ShortenURL", post(rpc::shorten_url))
        .route("/rpc/GetOriginalURL", post(rpc::get_original_url))
        .route("/rpc/IncrementClick", post(rpc::increment_click))
        .route("/rpc/HealthCheck", post(rpc::health_check))
        .route("/rpc/GetURLStats", post(rpc::get_url_stats))
        .route("/rpc/UpdateURL", post(rpc::update_url))
        .route("/rpc/DeleteURL", post(rpc::delete_url))
        .route("/rpc/ListAllURLs", post(rpc::list_all_urls))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// CORS policy for the configured origins. A `*` entry allows any origin;
/// entries that are not valid header values are skipped with a warning.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}
