//! Project endpoints: creation (guarded against duplicate races), graph
//! fetch, snapshot health, and competitor → project resolution.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{
    Competitor, Product, Project, ResolutionConfidence, ResolutionEntry, ScrapeFrequency,
};
use vg_store::project_creation_key;

use crate::state::AppState;

use super::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct CreateProductBody {
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub positioning: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCompetitorBody {
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateProjectBody {
    pub name: String,
    pub user_id: String,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub product: Option<CreateProductBody>,
    #[serde(default)]
    pub competitors: Vec<CreateCompetitorBody>,
}

/// Create a project. The named lock serializes concurrent creations of the
/// same `{user, name}`; losers hit the repository's duplicate check.
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectBody>,
) -> ApiResult<Json<Value>> {
    if body.name.trim().is_empty() {
        return Err(Error::validation("project name must not be empty").into());
    }

    let key = project_creation_key(&body.user_id, &body.name);
    let _creation_lock = state.creation_locks.acquire(&key).await;

    let mut project = Project::new(body.name.trim(), body.user_id.clone());
    if let Some(raw) = &body.frequency {
        project.scraping_frequency = raw
            .parse::<ScrapeFrequency>()
            .map_err(ApiError::from)?;
    }
    let project = state.repo.create_project(project).await?;

    if let Some(product) = body.product {
        state
            .repo
            .create_product(Product {
                id: Uuid::new_v4(),
                project_id: project.id,
                name: product.name,
                website: product.website,
                positioning: product.positioning,
                industry: product.industry,
                customer_description: None,
                problem_statement: None,
            })
            .await?;
    }
    for competitor in body.competitors {
        let created = state
            .repo
            .create_competitor(Competitor {
                id: Uuid::new_v4(),
                name: competitor.name,
                website: competitor.website,
                description: competitor.description,
                industry: None,
            })
            .await?;
        state.repo.attach_competitor(project.id, created.id).await?;
    }

    // Register the scrape schedule for the chosen frequency.
    let frequency = project.scraping_frequency.clone();
    let schedule_id = state.scheduler.schedule(project.id, frequency).await?;

    let graph = state
        .repo
        .find_project_with_graph(project.id)
        .await?
        .ok_or_else(|| Error::storage("project vanished after creation"))?;
    Ok(Json(json!({ "project": graph, "schedule_id": schedule_id })))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let graph = state
        .repo
        .find_project_with_graph(id)
        .await?
        .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;
    Ok(Json(json!({ "project": graph })))
}

/// Snapshot-health rollup for a project's owners.
pub async fn snapshot_health(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let check = state.validator.check_project(id).await?;
    Ok(Json(json!({ "project_id": id, "snapshots": check })))
}

/// Resolve which project a competitor belongs to, through the TTL cache
/// when intelligent caching is enabled.
pub async fn resolve_competitor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let caching = state.config.features.intelligent_caching;
    if caching {
        if let Some(entry) = state.resolution_cache.get(&id) {
            return Ok(Json(json!({ "resolution": entry, "cached": true })));
        }
    }

    let projects = state.repo.list_projects().await?;
    let holders: Vec<&vg_domain::model::Project> = projects
        .iter()
        .filter(|p| p.competitor_ids.contains(&id))
        .collect();
    let Some(first) = holders.first() else {
        return Err(
            Error::new(ErrorKind::OwnerNotFound, "competitor not tracked by any project").into(),
        );
    };

    // A competitor shared by several projects resolves with lower
    // confidence: the pick is the first holder, not a certainty.
    let confidence = if holders.len() == 1 {
        ResolutionConfidence::High
    } else if holders.len() <= 3 {
        ResolutionConfidence::Medium
    } else {
        ResolutionConfidence::Low
    };
    let entry = ResolutionEntry {
        competitor_id: id,
        project_id: first.id,
        confidence,
        resolved_at: Utc::now(),
    };
    if caching {
        state.resolution_cache.insert(id, entry.clone());
    }
    Ok(Json(json!({ "resolution": entry, "cached": false })))
}
