//! kytos-api — REST API for the Kytos optimizer.
//!
//! Thin axum adapter over `kytos_placement::solve_placement`. The solve is
//! CPU-bound and runs on the blocking pool.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/optimize` | Compute a placement plan for a cluster snapshot |
//! | GET | `/health` | Liveness probe |

pub mod handlers;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;

use kytos_core::{AnnealingSettings, ServerConfig};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Settings used when a request omits them.
    pub defaults: AnnealingSettings,
}

/// Build the API router with CORS restricted to the configured origins.
pub fn build_router(server: &ServerConfig, defaults: AnnealingSettings) -> Router {
    let api_state = ApiState { defaults };

    Router::new()
        .route("/optimize", post(handlers::optimize))
        .route("/health", get(handlers::health))
        .layer(cors_layer(&server.cors_origins))
        .with_state(api_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // tower-http rejects wildcard methods/headers together with credentials.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}
