//! Report composer.
//!
//! Renders an analysis (real or placeholder) into a sectioned artifact from
//! a template. Below the full-report threshold the partial-data variant
//! kicks in: conservative placeholder scores bounded by completeness,
//! per-section limitation notices, a trailing limitations section, and the
//! confidence clamp. The store's completion guard stays authoritative — a report
//! only turns `Completed` after a non-empty version is written.

pub mod partial;
pub mod sections;
pub mod template;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use vg_domain::config::PipelineConfig;
use vg_domain::model::{
    QualityTier, ReportSection, ReportVersion, ReportVersionMetadata,
};
use vg_domain::Result;
use vg_store::{with_storage_retries, Repository};

use crate::analysis::{placeholder_analysis, Analysis, AnalysisInput, AnalysisOrigin};
use crate::collector::CollectionResult;

pub use partial::{clamp_confidence, collect_gaps, DataGap, GapImpact};
pub use sections::build_context;
pub use template::{ReportFormat, ReportTemplate, SectionTemplate};

/// Fully rendered report, ready to persist as a version.
#[derive(Clone, Debug)]
pub struct ComposedReport {
    pub sections: Vec<ReportSection>,
    pub executive_summary: String,
    pub key_findings: Vec<String>,
    pub strategic_recommendations: String,
    pub competitive_intelligence: String,
    pub metadata: ReportVersionMetadata,
    pub format: ReportFormat,
    pub content: String,
}

pub struct ComposeInput<'a> {
    /// `None` forces the partial-data variant.
    pub analysis: Option<&'a Analysis>,
    pub collection: &'a CollectionResult,
    pub quality_tier: QualityTier,
}

pub struct ReportComposer {
    repo: Arc<dyn Repository>,
    cfg: PipelineConfig,
}

impl ReportComposer {
    pub fn new(repo: Arc<dyn Repository>, cfg: PipelineConfig) -> Self {
        Self { repo, cfg }
    }

    /// Render the report. Pure — persistence is [`Self::persist`].
    pub fn render(&self, input: &ComposeInput<'_>, template: &ReportTemplate) -> ComposedReport {
        let completeness = input.collection.completeness_score;
        let is_partial =
            input.analysis.is_none() || completeness < self.cfg.min_completeness_for_full;

        // Synthesize a conservative analysis when the real one is missing,
        // and clamp confidence whenever the data is partial.
        let mut analysis = match input.analysis {
            Some(analysis) => analysis.clone(),
            None => placeholder_analysis(
                &analysis_input_from_collection(input.collection),
                completeness,
            ),
        };
        if is_partial {
            analysis.summary.confidence_score =
                clamp_confidence(analysis.summary.confidence_score, completeness);
        }

        let gaps = collect_gaps(input.collection);
        let ctx = build_context(&analysis, input.collection);

        let mut composed_sections = Vec::with_capacity(template.sections.len() + 1);
        let mut joined: Vec<(String, String)> = Vec::new();
        for (idx, section) in template.sections.iter().enumerate() {
            let mut body = template::render_body(&section.body, &ctx);
            if is_partial {
                if let Some(notice) = partial::limitation_notice(&section.id, &gaps) {
                    body = format!("{notice}\n\n{body}");
                }
            }
            composed_sections.push(ReportSection {
                id: section.id.clone(),
                title: section.title.clone(),
                body: body.clone(),
                order: idx as u32,
            });
            joined.push((section.title.clone(), body));
        }

        let has_data_limitations = is_partial && !gaps.is_empty();
        if has_data_limitations {
            let section =
                partial::limitations_section(&gaps, completeness, composed_sections.len() as u32);
            joined.push((section.title.clone(), section.body.clone()));
            composed_sections.push(section);
        }

        let content = template::join_sections(&joined, template.format);
        let executive_summary = composed_sections
            .iter()
            .find(|s| s.id == sections::SECTION_EXECUTIVE_SUMMARY)
            .map(|s| s.body.clone())
            .unwrap_or_default();
        let strategic_recommendations = composed_sections
            .iter()
            .find(|s| s.id == sections::SECTION_STRATEGIC_RECOMMENDATIONS)
            .map(|s| s.body.clone())
            .unwrap_or_default();

        ComposedReport {
            executive_summary,
            key_findings: analysis.key_findings.clone(),
            strategic_recommendations,
            competitive_intelligence: analysis.competitive_intelligence.clone(),
            metadata: ReportVersionMetadata {
                completeness_score: completeness,
                freshness: input.collection.freshness,
                quality_tier: input.quality_tier,
                template_id: template.id.clone(),
                has_data_limitations,
            },
            format: template.format,
            content,
            sections: composed_sections,
        }
    }

    /// Write the rendered artifact as the report's next version. Retryable
    /// storage conflicts get the jittered optimistic-retry treatment.
    pub async fn persist(
        &self,
        report_id: Uuid,
        composed: &ComposedReport,
    ) -> Result<ReportVersion> {
        with_storage_retries(3, Duration::from_millis(50), || {
            self.repo.create_report_version(
                report_id,
                composed.content.clone(),
                composed.sections.clone(),
                composed.metadata.clone(),
            )
        })
        .await
    }
}

/// Rebuild the analysis-stage input shape from a finished collection (the
/// placeholder synthesizer speaks that shape).
pub fn analysis_input_from_collection(collection: &CollectionResult) -> AnalysisInput {
    AnalysisInput {
        product: collection.product.product.clone(),
        product_snapshot: collection.product.snapshot.clone(),
        competitors: collection
            .competitors
            .iter()
            .map(|c| crate::analysis::CompetitorInput {
                competitor: c.competitor.clone(),
                snapshot: c.snapshot.clone(),
            })
            .collect(),
        config: Default::default(),
    }
}

/// True when the composer will produce the partial-data variant.
pub fn is_partial_render(analysis: Option<&Analysis>, completeness: f64, min_for_full: f64) -> bool {
    analysis.is_none()
        || analysis.is_some_and(|a| a.origin == AnalysisOrigin::Placeholder)
        || completeness < min_for_full
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use vg_domain::model::{
        Competitor, DataFreshness, Product, Project, Snapshot, SnapshotMetadata, SnapshotOwner,
    };
    use vg_store::InMemoryRepository;

    use crate::analysis::{
        Analysis, AnalysisSummary, MarketPosition, Recommendations,
    };
    use crate::collector::{CompetitorData, DataQuality, DataSource, ProductData};

    fn snapshot(owner: SnapshotOwner) -> Snapshot {
        Snapshot {
            id: Uuid::new_v4(),
            owner,
            created_at: Utc::now(),
            capture_success: true,
            error_message: None,
            metadata: SnapshotMetadata {
                html: Some("z".repeat(400)),
                text: Some("features ".repeat(50)),
                title: Some("Site".into()),
                http_status: Some(200),
                content_length: Some(400),
                duration_ms: Some(30),
                extra: serde_json::Value::Null,
            },
        }
    }

    fn full_collection() -> CollectionResult {
        let product = Product {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "Widget".into(),
            website: "https://widget.example".into(),
            positioning: Some("fastest".into()),
            industry: None,
            customer_description: None,
            problem_statement: None,
        };
        let competitor = Competitor {
            id: Uuid::new_v4(),
            name: "Globex".into(),
            website: "https://globex.example".into(),
            description: None,
            industry: None,
        };
        CollectionResult {
            product: ProductData {
                snapshot: Some(snapshot(SnapshotOwner::Product(product.id))),
                product,
            },
            competitors: vec![CompetitorData {
                snapshot: Some(snapshot(SnapshotOwner::Competitor(competitor.id))),
                competitor,
                data_source: DataSource::FreshSnapshot,
                data_quality: DataQuality::High,
                limitation: None,
            }],
            completeness_score: 94.0,
            freshness: DataFreshness::New,
            partial: false,
            captured_now: 0,
            from_existing: 1,
            fallback_only: 0,
            duration_ms: 20,
        }
    }

    fn empty_collection() -> CollectionResult {
        let mut c = full_collection();
        c.product.snapshot = None;
        for entry in &mut c.competitors {
            entry.snapshot = None;
            entry.data_source = DataSource::BasicMetadata;
            entry.data_quality = DataQuality::Low;
            entry.limitation = Some("capture failed: timeout".into());
        }
        c.completeness_score = 38.0;
        c.freshness = DataFreshness::Basic;
        c.fallback_only = c.competitors.len();
        c.from_existing = 0;
        c
    }

    fn llm_analysis() -> Analysis {
        Analysis {
            id: Uuid::new_v4(),
            summary: AnalysisSummary {
                overall_position: MarketPosition::Leading,
                opportunity_score: 82.0,
                confidence_score: 88.0,
                priority_score: 75.0,
            },
            key_findings: vec!["Globex raised prices".into()],
            competitive_intelligence: "Globex is moving upmarket.".into(),
            recommendations: Recommendations {
                immediate: vec!["Highlight price advantage".into()],
                short_term: vec![],
                long_term: vec!["Expand feature set".into()],
            },
            origin: AnalysisOrigin::Llm,
            usage: None,
        }
    }

    fn composer(repo: Arc<InMemoryRepository>) -> ReportComposer {
        ReportComposer::new(repo, PipelineConfig::default())
    }

    #[test]
    fn full_render_has_every_template_section() {
        let repo = Arc::new(InMemoryRepository::new());
        let composer = composer(repo);
        let collection = full_collection();
        let analysis = llm_analysis();

        let composed = composer.render(
            &ComposeInput {
                analysis: Some(&analysis),
                collection: &collection,
                quality_tier: QualityTier::Complete,
            },
            &ReportTemplate::standard(ReportFormat::Markdown),
        );

        assert_eq!(composed.sections.len(), 5);
        assert!(!composed.metadata.has_data_limitations);
        assert!(composed.content.contains("## Executive Summary"));
        assert!(composed.content.contains("Widget is currently leading"));
        assert!(composed.content.contains("Globex"));
        assert!(composed.executive_summary.contains("leading"));
        // Full data: confidence untouched.
        assert!(composed.content.contains("confidence: 88/100"));
        // Ordered sections.
        for (idx, section) in composed.sections.iter().enumerate() {
            assert_eq!(section.order, idx as u32);
        }
    }

    #[test]
    fn missing_analysis_renders_partial_variant() {
        let repo = Arc::new(InMemoryRepository::new());
        let composer = composer(repo);
        let collection = empty_collection();

        let composed = composer.render(
            &ComposeInput {
                analysis: None,
                collection: &collection,
                quality_tier: QualityTier::Basic,
            },
            &ReportTemplate::standard(ReportFormat::Markdown),
        );

        assert!(composed.metadata.has_data_limitations);
        let last = composed.sections.last().unwrap();
        assert_eq!(last.title, "Data Completeness & Limitations");
        assert!(last.body.contains("[high] Globex"));

        // Notices on comparison sections.
        let feature = composed
            .sections
            .iter()
            .find(|s| s.id == sections::SECTION_FEATURE_COMPARISON)
            .unwrap();
        assert!(feature.body.starts_with("> Data limitation"));

        // Confidence clamp: placeholder bounded by completeness, then −10.
        let shown = composed
            .sections
            .iter()
            .find(|s| s.id == sections::SECTION_EXECUTIVE_SUMMARY)
            .unwrap();
        assert!(shown.body.contains("confidence: 28/100"), "{}", shown.body);
    }

    #[test]
    fn low_completeness_clamps_even_real_analysis() {
        let repo = Arc::new(InMemoryRepository::new());
        let composer = composer(repo);
        let mut collection = full_collection();
        collection.completeness_score = 50.0;
        let analysis = llm_analysis();

        let composed = composer.render(
            &ComposeInput {
                analysis: Some(&analysis),
                collection: &collection,
                quality_tier: QualityTier::Enhanced,
            },
            &ReportTemplate::standard(ReportFormat::Markdown),
        );

        // 88 clamped to 50 − 10 = 40.
        assert!(composed.content.contains("confidence: 40/100"));
    }

    #[test]
    fn html_format_produces_markup() {
        let repo = Arc::new(InMemoryRepository::new());
        let composer = composer(repo);
        let collection = full_collection();
        let analysis = llm_analysis();

        let composed = composer.render(
            &ComposeInput {
                analysis: Some(&analysis),
                collection: &collection,
                quality_tier: QualityTier::Complete,
            },
            &ReportTemplate::standard(ReportFormat::Html),
        );
        assert!(composed.content.starts_with("<article>"));
        assert!(composed.content.contains("<h2>Executive Summary</h2>"));
    }

    #[tokio::test]
    async fn persist_writes_nonempty_version() {
        let repo = Arc::new(InMemoryRepository::new());
        let project = repo.create_project(Project::new("p", "u")).await.unwrap();
        let collection = full_collection();
        let product = vg_domain::model::Product {
            project_id: project.id,
            ..collection.product.product.clone()
        };
        let product = repo.create_product(product).await.unwrap();
        let report = repo.create_report(project.id, product.id).await.unwrap();

        let composer = composer(repo.clone());
        let analysis = llm_analysis();
        let composed = composer.render(
            &ComposeInput {
                analysis: Some(&analysis),
                collection: &collection,
                quality_tier: QualityTier::Complete,
            },
            &ReportTemplate::standard(ReportFormat::Markdown),
        );
        let version = composer.persist(report.id, &composed).await.unwrap();

        assert_eq!(version.version, 1);
        assert!(!version.content.trim().is_empty());
        assert!(version.metadata.completeness_score >= 90.0);

        // The completion guard accepts the transition now.
        assert!(repo
            .update_report_status(report.id, vg_domain::model::ReportStatus::Completed)
            .await
            .is_ok());
    }

    #[test]
    fn template_by_id_fallback() {
        assert_eq!(ReportTemplate::by_id(None).format, ReportFormat::Markdown);
        assert_eq!(
            ReportTemplate::by_id(Some("standard_html")).format,
            ReportFormat::Html
        );
        assert_eq!(
            ReportTemplate::by_id(Some("nonsense")).id,
            "standard"
        );
    }

    #[test]
    fn partial_render_predicate() {
        let analysis = llm_analysis();
        assert!(is_partial_render(None, 90.0, 70.0));
        assert!(is_partial_render(Some(&analysis), 50.0, 70.0));
        assert!(!is_partial_render(Some(&analysis), 90.0, 70.0));
    }
}
