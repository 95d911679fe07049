//! Metrics endpoints: dashboard, analytics, wire export.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use vg_domain::error::Error;

use crate::metrics::{AnalyticsReport, DashboardSnapshot, Timeframe};
use crate::state::AppState;

use super::ApiResult;

#[derive(Deserialize, Default)]
pub struct TimeframeQuery {
    #[serde(default)]
    pub timeframe: Option<String>,
}

fn parse_timeframe(raw: &Option<String>) -> ApiResult<Timeframe> {
    match raw {
        None => Ok(Timeframe::Daily),
        Some(raw) => Timeframe::parse(raw)
            .ok_or_else(|| Error::validation(format!("unknown timeframe {raw:?}")).into()),
    }
}

pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<TimeframeQuery>,
) -> ApiResult<Json<DashboardSnapshot>> {
    let timeframe = parse_timeframe(&query.timeframe)?;
    Ok(Json(state.metrics.snapshot_dashboard(timeframe)))
}

pub async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<TimeframeQuery>,
) -> ApiResult<Json<AnalyticsReport>> {
    let timeframe = parse_timeframe(&query.timeframe)?;
    Ok(Json(state.metrics.get_analytics(timeframe)))
}

pub async fn export(State(state): State<AppState>) -> Json<Value> {
    Json(state.metrics.export_wire_format())
}
