//! The report pipeline: readiness scoring, collection, analysis, and
//! composition, run in order under one propagated deadline with phase callbacks.
//!
//! The caller (the coordinator) owns admission, timeout racing, and queue
//! fallback; this type owns the happy path and its failure semantics:
//! - below the partial-data threshold the LLM call is skipped entirely;
//! - a storage failure while persisting the version marks the report
//!   `Failed` and surfaces `storage_unavailable`;
//! - observed cancellation marks the report `Failed` (best effort) and
//!   surfaces `cancelled`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use vg_domain::config::{Config, PipelineConfig};
use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{DataFreshness, QualityTier, ReportStatus};
use vg_domain::{CancelToken, Result};
use vg_store::Repository;

use crate::analysis::{AnalysisOrigin, AnalysisStage};
use crate::collector::{CollectOptions, SmartCollector};
use crate::completeness::CompletenessChecker;
use crate::compose::{
    analysis_input_from_collection, ComposeInput, ReportComposer, ReportTemplate,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Validation,
    SnapshotCapture,
    DataCollection,
    Analysis,
    ReportGeneration,
    Completed,
}

impl PipelinePhase {
    /// Nominal progress when the phase begins.
    pub fn progress(self) -> u8 {
        match self {
            Self::Validation => 5,
            Self::SnapshotCapture => 15,
            Self::DataCollection => 40,
            Self::Analysis => 65,
            Self::ReportGeneration => 85,
            Self::Completed => 100,
        }
    }
}

/// Phase callback: phase, message, data-completeness when known.
pub type PhaseSink = Arc<dyn Fn(PipelinePhase, &str, Option<f64>) + Send + Sync>;

/// A sink that drops everything (tests, scheduled refreshes).
pub fn null_sink() -> PhaseSink {
    Arc::new(|_, _, _| {})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
pub struct GenerateOptions {
    pub product_id: Option<Uuid>,
    pub template_id: Option<String>,
    /// Whole-pipeline budget (already reduced by the caller's reserve).
    pub budget: Duration,
    pub correlation_id: Uuid,
}

impl GenerateOptions {
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            product_id: None,
            template_id: None,
            budget,
            correlation_id: Uuid::new_v4(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineOutcome {
    pub report_id: Uuid,
    pub version_id: Uuid,
    pub completeness_score: f64,
    pub freshness: DataFreshness,
    pub quality_tier: QualityTier,
    pub analysis_origin: AnalysisOrigin,
    pub partial: bool,
    pub duration_ms: u64,
    /// Input/output token totals when the LLM ran.
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReportPipeline {
    repo: Arc<dyn Repository>,
    checker: CompletenessChecker,
    collector: SmartCollector,
    analysis: AnalysisStage,
    composer: ReportComposer,
    cfg: PipelineConfig,
    require_fresh: bool,
}

impl ReportPipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        checker: CompletenessChecker,
        collector: SmartCollector,
        analysis: AnalysisStage,
        composer: ReportComposer,
        config: &Config,
    ) -> Self {
        Self {
            repo,
            checker,
            collector,
            analysis,
            composer,
            cfg: config.pipeline.clone(),
            require_fresh: config.features.fresh_snapshot_requirement,
        }
    }

    /// Run the full pipeline for one project.
    pub async fn generate(
        &self,
        project_id: Uuid,
        opts: &GenerateOptions,
        cancel: &CancelToken,
        sink: &PhaseSink,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();
        let deadline = started + opts.budget;
        let correlation_id = opts.correlation_id;

        // ── Validation ───────────────────────────────────────────────
        sink(PipelinePhase::Validation, "validating project readiness", None);
        let readiness = self
            .checker
            .score(project_id, self.checker.default_options())
            .await
            .map_err(|e| e.with_correlation(correlation_id))?;
        tracing::info!(
            correlation_id = %correlation_id,
            project_id = %project_id,
            readiness = readiness.overall_score,
            grade = ?readiness.grade,
            "pipeline admitted"
        );

        let graph = self
            .repo
            .find_project_with_graph(project_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;
        let product = match opts.product_id {
            Some(id) => graph.products.iter().find(|p| p.id == id),
            None => graph.products.first(),
        }
        .ok_or_else(|| {
            Error::validation("project has no product to report on")
                .with_correlation(correlation_id)
        })?;

        let report = self.repo.create_report(project_id, product.id).await?;
        self.repo
            .update_report_status(report.id, ReportStatus::InProgress)
            .await?;

        // ── Collection ───────────────────────────────────────────────
        sink(
            PipelinePhase::SnapshotCapture,
            "capturing missing competitor snapshots",
            None,
        );
        // Collection gets at most half the remaining budget so analysis
        // and composition keep room to run.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let collect_opts = CollectOptions {
            budget: remaining.mul_f64(0.5).max(Duration::from_millis(1)),
            product_id: Some(product.id),
            allow_stale: self.cfg.accept_stale_snapshots,
            require_fresh: self.require_fresh,
        };
        let collection = self
            .collector
            .collect(project_id, &collect_opts, cancel)
            .await
            .map_err(|e| e.with_correlation(correlation_id))?;
        sink(
            PipelinePhase::DataCollection,
            "competitor data assembled",
            Some(collection.completeness_score),
        );
        self.bail_if_cancelled(cancel, report.id, correlation_id).await?;

        // ── Analysis ─────────────────────────────────────────────────
        let analysis = if collection.completeness_score < self.cfg.partial_data_threshold {
            sink(
                PipelinePhase::Analysis,
                "completeness below threshold, composing from placeholder",
                Some(collection.completeness_score),
            );
            None
        } else {
            sink(
                PipelinePhase::Analysis,
                "running comparative analysis",
                Some(collection.completeness_score),
            );
            let input = analysis_input_from_collection(&collection);
            Some(
                self.analysis
                    .analyze(&input, collection.completeness_score, cancel)
                    .await,
            )
        };
        self.bail_if_cancelled(cancel, report.id, correlation_id).await?;

        // ── Composition ──────────────────────────────────────────────
        sink(
            PipelinePhase::ReportGeneration,
            "rendering report",
            Some(collection.completeness_score),
        );
        let template = ReportTemplate::by_id(opts.template_id.as_deref());
        let composed = self.composer.render(
            &ComposeInput {
                analysis: analysis.as_ref(),
                collection: &collection,
                quality_tier: readiness.quality_tier,
            },
            &template,
        );

        let version = match self.composer.persist(report.id, &composed).await {
            Ok(version) => version,
            Err(err) => {
                // No version, no COMPLETED — fail the report instead.
                let _ = self
                    .repo
                    .update_report_status(report.id, ReportStatus::Failed)
                    .await;
                return Err(err.with_correlation(correlation_id));
            }
        };
        self.repo
            .update_report_status(report.id, ReportStatus::Completed)
            .await
            .map_err(|e| e.with_correlation(correlation_id))?;

        sink(
            PipelinePhase::Completed,
            "report ready",
            Some(collection.completeness_score),
        );

        let (input_tokens, output_tokens) = analysis
            .as_ref()
            .and_then(|a| a.usage)
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        let outcome = PipelineOutcome {
            report_id: report.id,
            version_id: version.id,
            completeness_score: collection.completeness_score,
            freshness: collection.freshness,
            quality_tier: readiness.quality_tier,
            analysis_origin: analysis
                .as_ref()
                .map(|a| a.origin)
                .unwrap_or(AnalysisOrigin::Placeholder),
            partial: collection.partial,
            duration_ms: started.elapsed().as_millis() as u64,
            input_tokens,
            output_tokens,
        };
        tracing::info!(
            correlation_id = %correlation_id,
            report_id = %outcome.report_id,
            completeness = outcome.completeness_score,
            origin = ?outcome.analysis_origin,
            duration_ms = outcome.duration_ms,
            "report generated"
        );
        Ok(outcome)
    }

    async fn bail_if_cancelled(
        &self,
        cancel: &CancelToken,
        report_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            let _ = self
                .repo
                .update_report_status(report_id, ReportStatus::Failed)
                .await;
            return Err(Error::cancelled("pipeline cancelled").with_correlation(correlation_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::Url;

    use vg_domain::config::GovernorConfig;
    use vg_domain::model::{Competitor, Product, Project, SnapshotMetadata, SnapshotOwner};
    use vg_providers::{GenerateRequest, GenerateResponse, StopReason, TextGenerator};
    use vg_scraper::{CaptureWorker, FetchOptions, Governor, PageContent, PageFetcher};
    use vg_store::{InMemoryRepository, Repository};

    struct OkFetcher;

    #[async_trait]
    impl PageFetcher for OkFetcher {
        async fn fetch_page(&self, _url: &Url, _opts: &FetchOptions) -> Result<PageContent> {
            Ok(PageContent {
                html: "<html>plans and pricing</html>".repeat(10),
                text: "plans and pricing ".repeat(30),
                title: Some("Rival".into()),
                http_status: 200,
                duration: Duration::from_millis(2),
            })
        }
    }

    struct JsonLlm;

    #[async_trait]
    impl TextGenerator for JsonLlm {
        async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse> {
            Ok(GenerateResponse {
                content: r#"{"overall_position":"leading","opportunity_score":80,
                    "confidence_score":85,"priority_score":70,
                    "key_findings":["gap found"],
                    "competitive_intelligence":"solid position",
                    "recommendations":{"immediate":["act"],"short_term":[],"long_term":[]}}"#
                    .to_string(),
                stop_reason: StopReason::EndTurn,
                usage: None,
            })
        }

        fn generator_id(&self) -> &str {
            "json-llm"
        }
    }

    async fn seeded(
        competitors: usize,
    ) -> (Arc<InMemoryRepository>, Uuid) {
        let repo = Arc::new(InMemoryRepository::new());
        let project = repo.create_project(Project::new("intel", "u1")).await.unwrap();
        repo.create_product(Product {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: "Widget".into(),
            website: "https://widget.example".into(),
            positioning: Some("fastest".into()),
            industry: None,
            customer_description: Some("builders".into()),
            problem_statement: None,
        })
        .await
        .unwrap();
        for i in 0..competitors {
            let c = repo
                .create_competitor(Competitor {
                    id: Uuid::new_v4(),
                    name: format!("Rival {i}"),
                    website: format!("https://rival{i}.example"),
                    description: None,
                    industry: None,
                })
                .await
                .unwrap();
            repo.attach_competitor(project.id, c.id).await.unwrap();
        }
        (repo, project.id)
    }

    fn pipeline(
        repo: Arc<InMemoryRepository>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> ReportPipeline {
        let config = Config::default();
        let governor = Arc::new(Governor::new(GovernorConfig {
            domain_throttle_ms: 0,
            ..GovernorConfig::default()
        }));
        let worker = Arc::new(CaptureWorker::new(Arc::new(OkFetcher), repo.clone()));
        let scraper_cfg = vg_domain::config::ScraperConfig {
            capture_timeout_ms: 500,
            max_retry_attempts: 1,
            ..Default::default()
        };
        ReportPipeline::new(
            repo.clone(),
            CompletenessChecker::new(repo.clone(), config.pipeline.clone()),
            SmartCollector::new(
                repo.clone(),
                worker,
                governor,
                config.pipeline.clone(),
                &scraper_cfg,
            ),
            AnalysisStage::new(generator, Duration::from_millis(500)),
            ReportComposer::new(repo, config.pipeline.clone()),
            &config,
        )
    }

    #[tokio::test]
    async fn happy_path_completes_report_with_version() {
        let (repo, project_id) = seeded(3).await;
        // All competitors pre-snapshotted and fresh.
        let graph = repo.find_project_with_graph(project_id).await.unwrap().unwrap();
        for c in &graph.competitors {
            repo.put_snapshot(
                SnapshotOwner::Competitor(c.id),
                SnapshotMetadata {
                    html: Some("h".repeat(400)),
                    text: Some("pricing ".repeat(40)),
                    title: Some("Rival".into()),
                    http_status: Some(200),
                    content_length: Some(400),
                    duration_ms: Some(12),
                    extra: serde_json::Value::Null,
                },
                true,
                None,
            )
            .await
            .unwrap();
        }

        let phases: Arc<Mutex<Vec<(PipelinePhase, u8)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink: PhaseSink = {
            let phases = phases.clone();
            Arc::new(move |phase, _msg, _score| {
                phases.lock().unwrap().push((phase, phase.progress()));
            })
        };

        let p = pipeline(repo.clone(), Some(Arc::new(JsonLlm)));
        let outcome = p
            .generate(
                project_id,
                &GenerateOptions::with_budget(Duration::from_secs(40)),
                &CancelToken::new(),
                &sink,
            )
            .await
            .unwrap();

        assert!(outcome.completeness_score >= 85.0);
        assert_eq!(outcome.analysis_origin, AnalysisOrigin::Llm);
        assert!(matches!(
            outcome.freshness,
            DataFreshness::New | DataFreshness::Mixed
        ));

        let report = repo.report(outcome.report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        let versions = repo.report_versions(outcome.report_id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert!(!versions[0].content.trim().is_empty());

        let seen: Vec<(PipelinePhase, u8)> = phases.lock().unwrap().clone();
        let expected = [
            (PipelinePhase::Validation, 5),
            (PipelinePhase::SnapshotCapture, 15),
            (PipelinePhase::DataCollection, 40),
            (PipelinePhase::Analysis, 65),
            (PipelinePhase::ReportGeneration, 85),
            (PipelinePhase::Completed, 100),
        ];
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn no_generator_still_produces_report() {
        let (repo, project_id) = seeded(2).await;
        let p = pipeline(repo.clone(), None);
        let outcome = p
            .generate(
                project_id,
                &GenerateOptions::with_budget(Duration::from_secs(30)),
                &CancelToken::new(),
                &null_sink(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.analysis_origin, AnalysisOrigin::Placeholder);
        let report = repo.report(outcome.report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
    }

    #[tokio::test]
    async fn cancelled_pipeline_fails_report() {
        let (repo, project_id) = seeded(1).await;
        let p = pipeline(repo.clone(), Some(Arc::new(JsonLlm)));
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = p
            .generate(
                project_id,
                &GenerateOptions::with_budget(Duration::from_secs(30)),
                &cancel,
                &null_sink(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);

        // The report the run created was failed, not completed.
        let reports = repo.list_reports().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, ReportStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_project_is_owner_not_found() {
        let repo = Arc::new(InMemoryRepository::new());
        let p = pipeline(repo, Some(Arc::new(JsonLlm)));
        let err = p
            .generate(
                Uuid::new_v4(),
                &GenerateOptions::with_budget(Duration::from_secs(5)),
                &CancelToken::new(),
                &null_sink(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::OwnerNotFound);
    }

    #[test]
    fn phase_progress_is_monotonic() {
        let phases = [
            PipelinePhase::Validation,
            PipelinePhase::SnapshotCapture,
            PipelinePhase::DataCollection,
            PipelinePhase::Analysis,
            PipelinePhase::ReportGeneration,
            PipelinePhase::Completed,
        ];
        for pair in phases.windows(2) {
            assert!(pair[0].progress() < pair[1].progress());
        }
    }
}
