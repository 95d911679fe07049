//! Entity model — projects, products, competitors, snapshots, reports,
//! report versions, schedules, and the resolution-cache entry.
//!
//! Competitor membership is an id-set on the project; object graphs are
//! assembled on demand by the repository and never held across awaits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scrape frequency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How often a project's sites are re-captured. `Custom` carries a raw
/// 5-field cron expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cron", rename_all = "snake_case")]
pub enum ScrapeFrequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Custom(String),
}

impl ScrapeFrequency {
    /// Cron expression the scheduler fires on.
    pub fn cron(&self) -> String {
        match self {
            Self::Daily => "0 9 * * *".to_string(),
            Self::Weekly => "0 9 * * 1".to_string(),
            Self::Biweekly => "0 9 * * 1/2".to_string(),
            Self::Monthly => "0 9 1 * *".to_string(),
            Self::Custom(expr) => expr.clone(),
        }
    }
}

impl std::fmt::Display for ScrapeFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Biweekly => write!(f, "biweekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Custom(expr) => write!(f, "custom:{expr}"),
        }
    }
}

impl std::str::FromStr for ScrapeFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            other => {
                if let Some(expr) = other.strip_prefix("custom:") {
                    if expr.split_whitespace().count() == 5 {
                        // Preserve original casing of the cron expression.
                        let raw = s.trim();
                        let expr = &raw[raw.len() - expr.len()..];
                        return Ok(Self::Custom(expr.to_string()));
                    }
                    return Err(Error::validation(format!(
                        "custom frequency needs a 5-field cron, got {expr:?}"
                    )));
                }
                Err(Error::validation(format!("unknown frequency {s:?}")))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Projects, products, competitors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Archived,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Creating user; part of the duplicate-creation lock key.
    pub owner_user_id: String,
    pub scraping_frequency: ScrapeFrequency,
    pub status: ProjectStatus,
    /// Opaque per-project parameters (analysis focus, template overrides...).
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Exclusive children.
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    /// Many-to-many: competitors are shared across projects.
    #[serde(default)]
    pub competitor_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, owner_user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_user_id: owner_user_id.into(),
            scraping_frequency: ScrapeFrequency::Weekly,
            status: ProjectStatus::Active,
            parameters: HashMap::new(),
            product_ids: Vec::new(),
            competitor_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    /// Exclusive owner.
    pub project_id: Uuid,
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub positioning: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub customer_description: Option<String>,
    #[serde(default)]
    pub problem_statement: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Competitor {
    pub id: Uuid,
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

/// A project with its products and competitors resolved through the
/// repository (`find_project_with_graph`).
#[derive(Clone, Debug, Serialize)]
pub struct ProjectGraph {
    pub project: Project,
    pub products: Vec<Product>,
    pub competitors: Vec<Competitor>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot owner — exactly one of product or competitor, by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SnapshotOwner {
    Product(Uuid),
    Competitor(Uuid),
}

impl SnapshotOwner {
    pub fn product_id(&self) -> Option<Uuid> {
        match self {
            Self::Product(id) => Some(*id),
            Self::Competitor(_) => None,
        }
    }

    pub fn competitor_id(&self) -> Option<Uuid> {
        match self {
            Self::Competitor(id) => Some(*id),
            Self::Product(_) => None,
        }
    }
}

/// Free-form capture payload recorded with every snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Collaborator-specific extras (headers, redirects...).
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// One capture attempt's final result. Write-once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub owner: SnapshotOwner,
    pub created_at: DateTime<Utc>,
    pub capture_success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Age relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Fresh ⇔ successful and no older than the configured window.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.capture_success && self.age(now) <= window
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub project_id: Uuid,
    pub product_id: Uuid,
    pub analysis_id: Uuid,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input freshness classification of an assembled collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFreshness {
    /// Every competitor input was captured during this run.
    New,
    /// Every competitor input came from stored snapshots.
    Existing,
    /// Some captured now, some from storage.
    Mixed,
    /// Only basic metadata (no snapshots at all).
    Basic,
}

/// Freshness level of the newest valid snapshot feeding an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessLevel {
    Fresh,
    Recent,
    Stale,
    VeryStale,
}

/// Ordinal input-quality category: `basic < enhanced < fresh < complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Basic,
    Enhanced,
    Fresh,
    Complete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportSection {
    pub id: String,
    pub title: String,
    pub body: String,
    pub order: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportVersionMetadata {
    pub completeness_score: f64,
    pub freshness: DataFreshness,
    pub quality_tier: QualityTier,
    pub template_id: String,
    pub has_data_limitations: bool,
}

/// Rendered report artifact. `version` is monotonic per report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportVersion {
    pub id: Uuid,
    /// Exclusive owner.
    pub report_id: Uuid,
    pub version: u32,
    pub content: String,
    pub sections: Vec<ReportSection>,
    pub metadata: ReportVersionMetadata,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted schedule. The externally visible status is NOT stored — it is
/// derived from `enabled` + `consecutive_failures` via
/// [`ReportSchedule::computed_status`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Backlink for schedules created from a report.
    #[serde(default)]
    pub report_id: Option<Uuid>,
    pub frequency: ScrapeFrequency,
    /// Cron expression: "minute hour dom month dow" (5-field).
    pub cron: String,
    pub enabled: bool,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportSchedule {
    pub fn new(project_id: Uuid, frequency: ScrapeFrequency) -> Self {
        let now = Utc::now();
        let cron = frequency.cron();
        Self {
            id: Uuid::new_v4(),
            project_id,
            report_id: None,
            frequency,
            cron,
            enabled: true,
            next_run: None,
            last_run: None,
            consecutive_failures: 0,
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derive status from persisted state. Never stored. A degraded schedule
    /// is still active — firing continues.
    pub fn computed_status(&self, degraded_threshold: u32) -> ScheduleStatus {
        if !self.enabled {
            ScheduleStatus::Paused
        } else if self.consecutive_failures >= degraded_threshold {
            ScheduleStatus::Degraded
        } else {
            ScheduleStatus::Active
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Degraded,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionConfidence {
    High,
    Medium,
    Low,
}

/// TTL-bounded competitor → project resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub competitor_id: Uuid,
    pub project_id: Uuid,
    pub confidence: ResolutionConfidence,
    pub resolved_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Completion-content check usable by stores and the housekeeping sweep: a report may only
/// be `Completed` when at least one version has non-empty content.
pub fn completed_requires_content(
    status: ReportStatus,
    versions: &[ReportVersion],
) -> Result<()> {
    if status == ReportStatus::Completed
        && !versions.iter().any(|v| !v.content.trim().is_empty())
    {
        return Err(Error::new(ErrorKind::Validation, "no ReportVersions"));
    }
    Ok(())
}
