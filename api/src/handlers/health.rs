use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    models::{DatabaseHealth, HealthResponse},
    AppState,
};

/// Reports database connectivity. Unauthenticated requests are fine here;
/// the endpoint sits behind no role gate.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Database reachable", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Health check requested");

    let database = match state.db.ping().await {
        Ok(()) => DatabaseHealth {
            connected: true,
            message: "Database connection successful".to_string(),
        },
        Err(e) => {
            warn!("Health check could not reach the database: {}", e);
            DatabaseHealth {
                connected: false,
                message: format!("Database connection failed: {}", e),
            }
        }
    };

    let (code, status) = if database.connected {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            database,
        }),
    )
}
