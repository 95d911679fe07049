//! Data completeness checker.
//!
//! Scores a project's readiness for reporting. Required checks (project
//! basics, product data, snapshot quality) weigh 100, optional ones
//! (competitors, freshness, consistency, metadata richness) weigh 50.
//! Grades: A≥90, B≥80, C≥70, D≥60, else F.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use vg_domain::config::PipelineConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{
    FreshnessLevel, ProjectGraph, ProjectStatus, QualityTier, Snapshot, SnapshotOwner,
};
use vg_domain::Result;
use vg_scraper::SnapshotValidator;
use vg_store::Repository;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Check model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    ProjectBasics,
    ProductData,
    SnapshotQuality,
    Competitors,
    Freshness,
    Consistency,
    MetadataRichness,
}

impl CheckId {
    pub fn required(self) -> bool {
        matches!(
            self,
            Self::ProjectBasics | Self::ProductData | Self::SnapshotQuality
        )
    }

    pub fn weight(self) -> f64 {
        if self.required() {
            100.0
        } else {
            50.0
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckQuality {
    Missing,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl CheckQuality {
    fn from_score(present: bool, score: f64) -> Self {
        if !present {
            Self::Missing
        } else if score < 40.0 {
            Self::Poor
        } else if score < 60.0 {
            Self::Fair
        } else if score < 80.0 {
            Self::Good
        } else {
            Self::Excellent
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckResult {
    pub id: CheckId,
    pub score: f64,
    pub present: bool,
    pub quality: CheckQuality,
    pub required: bool,
    pub details: String,
    pub recommendations: Vec<String>,
}

impl CheckResult {
    fn new(id: CheckId, present: bool, score: f64, details: String) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            id,
            score,
            present,
            quality: CheckQuality::from_score(present, score),
            required: id.required(),
            details,
            recommendations: Vec::new(),
        }
    }

    fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::A
        } else if score >= 80.0 {
            Self::B
        } else if score >= 70.0 {
            Self::C
        } else if score >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletenessResult {
    pub overall_score: f64,
    pub grade: Grade,
    pub checks: Vec<CheckResult>,
    pub critical_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub freshness: FreshnessLevel,
    pub quality_tier: QualityTier,
    pub is_complete: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ScoreOptions {
    pub minimum_score: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompletenessChecker {
    repo: Arc<dyn Repository>,
    cfg: PipelineConfig,
}

impl CompletenessChecker {
    pub fn new(repo: Arc<dyn Repository>, cfg: PipelineConfig) -> Self {
        Self { repo, cfg }
    }

    pub fn default_options(&self) -> ScoreOptions {
        ScoreOptions {
            minimum_score: self.cfg.min_completeness_for_full,
        }
    }

    pub async fn score(&self, project_id: Uuid, opts: ScoreOptions) -> Result<CompletenessResult> {
        let graph = self
            .repo
            .find_project_with_graph(project_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;

        // Newest-first snapshot history per owner, shared by several checks.
        let mut histories: Vec<(SnapshotOwner, Vec<Snapshot>)> = Vec::new();
        for product in &graph.products {
            let owner = SnapshotOwner::Product(product.id);
            histories.push((owner, self.repo.recent_snapshots(owner, 10).await?));
        }
        for competitor in &graph.competitors {
            let owner = SnapshotOwner::Competitor(competitor.id);
            histories.push((owner, self.repo.recent_snapshots(owner, 10).await?));
        }

        let checks = vec![
            self.check_project_basics(&graph),
            self.check_product_data(&graph),
            self.check_snapshot_quality(&histories),
            self.check_competitors(&graph),
            self.check_freshness(&histories),
            self.check_consistency(&graph, &histories),
            self.check_metadata_richness(&histories),
        ];

        let weight_sum: f64 = checks.iter().map(|c| c.id.weight()).sum();
        let overall_score = checks
            .iter()
            .map(|c| c.score * c.id.weight())
            .sum::<f64>()
            / weight_sum;

        let critical_issues: Vec<String> = checks
            .iter()
            .filter(|c| c.required && c.score < 40.0)
            .map(|c| format!("{:?}: {}", c.id, c.details))
            .collect();
        let recommendations: Vec<String> = checks
            .iter()
            .flat_map(|c| c.recommendations.iter().cloned())
            .collect();

        let freshness = freshness_level(&histories, &self.cfg);
        let quality_tier = quality_tier(overall_score, freshness, &checks);
        let is_complete = overall_score >= opts.minimum_score && critical_issues.is_empty();

        Ok(CompletenessResult {
            overall_score,
            grade: Grade::from_score(overall_score),
            checks,
            critical_issues,
            recommendations,
            freshness,
            quality_tier,
            is_complete,
        })
    }

    // ── Required checks ──────────────────────────────────────────────

    fn check_project_basics(&self, graph: &ProjectGraph) -> CheckResult {
        let project = &graph.project;
        let mut score = 0.0;
        if !project.name.trim().is_empty() {
            score += 40.0;
        }
        score += 30.0; // scraping frequency is always set on the entity
        if project.status == ProjectStatus::Active {
            score += 30.0;
        }
        let details = format!(
            "name set: {}, status: {:?}",
            !project.name.trim().is_empty(),
            project.status
        );
        let check = CheckResult::new(CheckId::ProjectBasics, true, score, details);
        if project.status != ProjectStatus::Active {
            check.recommend("Reactivate the project to resume scheduled captures.")
        } else {
            check
        }
    }

    fn check_product_data(&self, graph: &ProjectGraph) -> CheckResult {
        let Some(product) = graph.products.first() else {
            return CheckResult::new(
                CheckId::ProductData,
                false,
                0.0,
                "project has no product".to_string(),
            )
            .recommend("Add the product under comparison, with its website.");
        };
        let mut score = 40.0;
        if !product.website.trim().is_empty() {
            score += 20.0;
        }
        if product.positioning.is_some() {
            score += 20.0;
        }
        if product.customer_description.is_some() || product.problem_statement.is_some() {
            score += 20.0;
        }
        let mut check = CheckResult::new(
            CheckId::ProductData,
            true,
            score,
            format!("product {} with website {}", product.name, product.website),
        );
        if product.positioning.is_none() {
            check = check.recommend("Describe the product's positioning to sharpen the analysis.");
        }
        check
    }

    fn check_snapshot_quality(&self, histories: &[(SnapshotOwner, Vec<Snapshot>)]) -> CheckResult {
        let with_any = histories.iter().filter(|(_, h)| !h.is_empty()).count();
        if with_any == 0 {
            return CheckResult::new(
                CheckId::SnapshotQuality,
                false,
                0.0,
                "no snapshots captured for any owner".to_string(),
            )
            .recommend("Trigger a scrape so captures exist before reporting.");
        }
        let with_valid = histories
            .iter()
            .filter(|(_, h)| {
                h.iter().any(|s| {
                    SnapshotValidator::validate_snapshot(s, self.cfg.min_content_bytes).is_valid
                })
            })
            .count();
        let score = with_valid as f64 / histories.len() as f64 * 100.0;
        let check = CheckResult::new(
            CheckId::SnapshotQuality,
            true,
            score,
            format!("{with_valid} of {} owners have a valid snapshot", histories.len()),
        );
        if with_valid < histories.len() {
            check.recommend("Re-capture owners whose snapshots failed validation.")
        } else {
            check
        }
    }

    // ── Optional checks ──────────────────────────────────────────────

    fn check_competitors(&self, graph: &ProjectGraph) -> CheckResult {
        let count = graph.competitors.len();
        let score = match count {
            0 => 0.0,
            1 => 50.0,
            2 => 75.0,
            _ => 100.0,
        };
        let check = CheckResult::new(
            CheckId::Competitors,
            count > 0,
            score,
            format!("{count} competitors tracked"),
        );
        if count < 3 {
            check.recommend("Track at least three competitors for a meaningful comparison.")
        } else {
            check
        }
    }

    fn check_freshness(&self, histories: &[(SnapshotOwner, Vec<Snapshot>)]) -> CheckResult {
        let level = freshness_level(histories, &self.cfg);
        let (present, score) = match level {
            FreshnessLevel::Fresh => (true, 100.0),
            FreshnessLevel::Recent => (true, 80.0),
            FreshnessLevel::Stale => (true, 50.0),
            FreshnessLevel::VeryStale => (
                histories.iter().any(|(_, h)| !h.is_empty()),
                20.0,
            ),
        };
        let score = if present { score } else { 0.0 };
        let check = CheckResult::new(
            CheckId::Freshness,
            present,
            score,
            format!("newest valid snapshot is {level:?}"),
        );
        match level {
            FreshnessLevel::Fresh | FreshnessLevel::Recent => check,
            _ => check.recommend("Refresh snapshots; inputs are past the freshness window."),
        }
    }

    fn check_consistency(
        &self,
        graph: &ProjectGraph,
        histories: &[(SnapshotOwner, Vec<Snapshot>)],
    ) -> CheckResult {
        if graph.competitors.is_empty() {
            return CheckResult::new(
                CheckId::Consistency,
                false,
                0.0,
                "no competitors to cross-check".to_string(),
            );
        }
        let with_site = graph
            .competitors
            .iter()
            .filter(|c| !c.website.trim().is_empty())
            .count();
        let latest_ok = histories
            .iter()
            .filter(|(owner, h)| {
                matches!(owner, SnapshotOwner::Competitor(_))
                    && h.first().is_some_and(|s| s.capture_success)
            })
            .count();
        let score = (with_site + latest_ok) as f64
            / (graph.competitors.len() * 2) as f64
            * 100.0;
        CheckResult::new(
            CheckId::Consistency,
            true,
            score,
            format!(
                "{with_site}/{} with websites, {latest_ok}/{} last capture ok",
                graph.competitors.len(),
                graph.competitors.len()
            ),
        )
    }

    fn check_metadata_richness(
        &self,
        histories: &[(SnapshotOwner, Vec<Snapshot>)],
    ) -> CheckResult {
        let valid: Vec<&Snapshot> = histories
            .iter()
            .filter_map(|(_, h)| {
                h.iter().find(|s| {
                    SnapshotValidator::validate_snapshot(s, self.cfg.min_content_bytes).is_valid
                })
            })
            .collect();
        if valid.is_empty() {
            return CheckResult::new(
                CheckId::MetadataRichness,
                false,
                0.0,
                "no valid snapshots to inspect".to_string(),
            );
        }
        let total: f64 = valid
            .iter()
            .map(|s| {
                let mut parts = 0.0;
                if s.metadata.title.is_some() {
                    parts += 1.0;
                }
                if s.metadata.http_status.is_some() {
                    parts += 1.0;
                }
                if s.metadata.text.as_deref().is_some_and(|t| !t.is_empty()) {
                    parts += 1.0;
                }
                parts / 3.0 * 100.0
            })
            .sum();
        let score = total / valid.len() as f64;
        CheckResult::new(
            CheckId::MetadataRichness,
            true,
            score,
            format!("{} valid snapshots inspected", valid.len()),
        )
    }
}

/// Freshness of the newest valid snapshot across every owner.
fn freshness_level(
    histories: &[(SnapshotOwner, Vec<Snapshot>)],
    cfg: &PipelineConfig,
) -> FreshnessLevel {
    let now = Utc::now();
    let newest = histories
        .iter()
        .flat_map(|(_, h)| h.iter())
        .filter(|s| SnapshotValidator::validate_snapshot(s, cfg.min_content_bytes).is_valid)
        .map(|s| s.age(now))
        .min();
    match newest {
        Some(age) if age < chrono::Duration::hours(1) => FreshnessLevel::Fresh,
        Some(age) if age < chrono::Duration::days(1) => FreshnessLevel::Recent,
        Some(age) if age < chrono::Duration::days(7) => FreshnessLevel::Stale,
        _ => FreshnessLevel::VeryStale,
    }
}

/// Quality tier fed to the composer and metrics.
fn quality_tier(overall: f64, freshness: FreshnessLevel, checks: &[CheckResult]) -> QualityTier {
    let required_solid = checks
        .iter()
        .filter(|c| c.required)
        .all(|c| c.score >= 60.0);
    let recent = matches!(freshness, FreshnessLevel::Fresh | FreshnessLevel::Recent);
    if overall >= 85.0 && recent && required_solid {
        QualityTier::Complete
    } else if overall >= 70.0 && freshness == FreshnessLevel::Fresh {
        QualityTier::Fresh
    } else if overall >= 50.0 {
        QualityTier::Enhanced
    } else {
        QualityTier::Basic
    }
}
