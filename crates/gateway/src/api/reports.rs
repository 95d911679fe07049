//! Report endpoints: the generate entry point and report fetch.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use vg_domain::error::{Error, ErrorKind};

use crate::coordinator::{AsyncResult, ReportOptions};
use crate::queue::Priority;
use crate::state::AppState;

use super::ApiResult;

#[derive(Deserialize, Default)]
pub struct GenerateReportBody {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub fallback_to_queue: Option<bool>,
    #[serde(default)]
    pub notify_on_completion: bool,
    #[serde(default)]
    pub template: Option<String>,
}

pub async fn generate_report(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    body: Option<Json<GenerateReportBody>>,
) -> ApiResult<Json<AsyncResult>> {
    if state.repo.project(project_id).await?.is_none() {
        return Err(Error::new(ErrorKind::OwnerNotFound, "project not found").into());
    }
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let opts = ReportOptions {
        timeout: body.timeout_ms.map(Duration::from_millis),
        priority: body.priority,
        fallback_to_queue: body.fallback_to_queue,
        notify_on_completion: body.notify_on_completion,
        template: body.template,
    };
    let result = state
        .coordinator
        .process_initial_report(project_id, &opts)
        .await;
    Ok(Json(result))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let report = state
        .repo
        .report(id)
        .await?
        .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "report not found"))?;
    let versions = state.repo.report_versions(id).await?;
    Ok(Json(json!({ "report": report, "versions": versions })))
}
