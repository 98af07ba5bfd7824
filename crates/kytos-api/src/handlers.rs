//! REST API handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use kytos_core::{OptimizationRequest, OptimizeError};
use kytos_placement::solve_placement;

use crate::ApiState;

/// Error body returned for failed solves.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    detail: String,
}

fn error_response(code: &'static str, detail: String, status: StatusCode) -> Response {
    (status, Json(ErrorBody { code, detail })).into_response()
}

fn optimize_error_response(err: &OptimizeError) -> Response {
    let status = match err {
        OptimizeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OptimizeError::Infeasible { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(err.code(), err.to_string(), status)
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub detail: &'static str,
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        detail: "Kytos Orchestration running",
    })
}

// ── Optimize ───────────────────────────────────────────────────

/// POST /optimize
///
/// Pods to be newly placed are submitted with `current_node: null`.
pub async fn optimize(
    State(state): State<ApiState>,
    Json(req): Json<OptimizationRequest>,
) -> Response {
    let settings = req.settings.unwrap_or_else(|| state.defaults.clone());
    let cluster = req.state;

    let result = tokio::task::spawn_blocking(move || solve_placement(&cluster, &settings)).await;

    match result {
        Ok(Ok(plan)) => (StatusCode::OK, Json(plan)).into_response(),
        Ok(Err(e)) => {
            warn!(code = e.code(), error = %e, "optimization failed");
            optimize_error_response(&e)
        }
        Err(e) => {
            error!(error = %e, "solver task panicked");
            error_response(
                "internal",
                "solver task failed".to_string(),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}
