//! Schedule endpoints: CRUD, pause, and manual trigger.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{ReportSchedule, ScrapeFrequency};

use crate::state::AppState;

use super::ApiResult;

fn schedule_view(state: &AppState, schedule: &ReportSchedule) -> Value {
    let threshold = state.scheduler.degraded_threshold();
    json!({
        "schedule": schedule,
        "status": schedule.computed_status(threshold),
    })
}

#[derive(Deserialize)]
pub struct CreateScheduleBody {
    pub project_id: Uuid,
    pub frequency: String,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<CreateScheduleBody>,
) -> ApiResult<Json<Value>> {
    let frequency: ScrapeFrequency = body.frequency.parse()?;
    let schedule_id = state.scheduler.schedule(body.project_id, frequency).await?;
    let schedule = state
        .repo
        .schedule(schedule_id)
        .await?
        .ok_or_else(|| Error::storage("schedule vanished after creation"))?;
    Ok(Json(schedule_view(&state, &schedule)))
}

pub async fn list_schedules(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let schedules = state.repo.list_schedules().await?;
    let views: Vec<Value> = schedules
        .iter()
        .map(|s| schedule_view(&state, s))
        .collect();
    Ok(Json(json!({ "schedules": views })))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let schedule = state
        .repo
        .schedule(id)
        .await?
        .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "schedule not found"))?;
    Ok(Json(schedule_view(&state, &schedule)))
}

pub async fn pause_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if !state.scheduler.stop(id).await? {
        return Err(Error::new(ErrorKind::OwnerNotFound, "schedule not found").into());
    }
    Ok(Json(json!({ "paused": true })))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let deleted = state.repo.delete_schedule(id).await?;
    if !deleted {
        return Err(Error::new(ErrorKind::OwnerNotFound, "schedule not found").into());
    }
    Ok(Json(json!({ "deleted": true })))
}

/// Manual trigger: fire the project's scrape refresh now. Overlapping
/// fires are dropped, mirroring the tick path.
pub async fn trigger_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let fired = state.scheduler.trigger(project_id).await?;
    Ok(Json(json!({ "fired": fired, "dropped_as_overlap": !fired })))
}
