//! Thin HTTP surface. Handlers hold no business logic — they parse input,
//! call the core, and shape JSON out. Domain error kinds map onto status
//! codes here and nowhere else.

pub mod metrics;
pub mod projects;
pub mod reports;
pub mod schedules;
pub mod status;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use vg_domain::error::{Error, ErrorKind};

use crate::state::AppState;

/// Error wrapper translating the domain taxonomy into HTTP.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation | ErrorKind::Parse => StatusCode::BAD_REQUEST,
            ErrorKind::OwnerNotFound => StatusCode::NOT_FOUND,
            ErrorKind::Duplicate => StatusCode::CONFLICT,
            ErrorKind::Congested | ErrorKind::BudgetExceeded | ErrorKind::Blocked => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorKind::StorageUnavailable | ErrorKind::LlmUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.0.kind.code(),
            "message": self.0.message,
            "correlation_id": self.0.correlation_id,
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health
        .route("/v1/health", get(health))
        // Projects
        .route("/v1/projects", post(projects::create_project))
        .route("/v1/projects/:id", get(projects::get_project))
        .route(
            "/v1/projects/:id/snapshot-health",
            get(projects::snapshot_health),
        )
        .route(
            "/v1/competitors/:id/project",
            get(projects::resolve_competitor),
        )
        // Reports
        .route("/v1/projects/:id/reports", post(reports::generate_report))
        .route("/v1/reports/:id", get(reports::get_report))
        // Status stream
        .route(
            "/v1/projects/:id/status/events",
            get(status::status_events_sse),
        )
        // Schedules
        .route("/v1/schedules", get(schedules::list_schedules))
        .route("/v1/schedules", post(schedules::create_schedule))
        .route("/v1/schedules/:id", get(schedules::get_schedule))
        .route("/v1/schedules/:id", delete(schedules::delete_schedule))
        .route("/v1/schedules/:id/pause", post(schedules::pause_schedule))
        .route(
            "/v1/projects/:id/trigger",
            post(schedules::trigger_project),
        )
        // Metrics
        .route("/v1/metrics/dashboard", get(metrics::dashboard))
        .route("/v1/metrics/analytics", get(metrics::analytics))
        .route("/v1/metrics/export", get(metrics::export))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
