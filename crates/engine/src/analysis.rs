//! Analysis stage.
//!
//! Polymorphic over the `generate_text` capability. Builds a structured
//! prompt from the assembled collection, parses the model's JSON findings,
//! and clamps every score into [0,100]. Any failure — no generator, timeout,
//! refusal, undecodable output — degrades to the deterministic placeholder
//! analysis instead of failing the report request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vg_domain::model::{Competitor, Product, Snapshot};
use vg_domain::CancelToken;
use vg_providers::{GenerateRequest, TextGenerator, TokenUsage};
use vg_scraper::with_cancel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / output types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPosition {
    Leading,
    Competitive,
    Trailing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Quick,
    Standard,
    Deep,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub focus_areas: Vec<String>,
    pub depth: AnalysisDepth,
    pub include_recommendations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            focus_areas: vec![
                "positioning".to_string(),
                "features".to_string(),
                "pricing".to_string(),
            ],
            depth: AnalysisDepth::Standard,
            include_recommendations: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompetitorInput {
    pub competitor: Competitor,
    pub snapshot: Option<Snapshot>,
}

#[derive(Clone, Debug)]
pub struct AnalysisInput {
    pub product: Product,
    pub product_snapshot: Option<Snapshot>,
    pub competitors: Vec<CompetitorInput>,
    pub config: AnalysisConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Recommendations {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub overall_position: MarketPosition,
    pub opportunity_score: f64,
    pub confidence_score: f64,
    pub priority_score: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOrigin {
    Llm,
    Placeholder,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub summary: AnalysisSummary,
    pub key_findings: Vec<String>,
    pub competitive_intelligence: String,
    pub recommendations: Recommendations,
    pub origin: AnalysisOrigin,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

pub fn clamp_score(raw: f64) -> f64 {
    raw.clamp(0.0, 100.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Placeholder analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministically synthesized analysis used when real analysis is
/// unavailable. Scores are conservative and bounded by the completeness of
/// the inputs that fed it.
pub fn placeholder_analysis(input: &AnalysisInput, completeness_score: f64) -> Analysis {
    let bound = clamp_score(completeness_score);
    let score = bound.min(50.0);

    let with_data = input
        .competitors
        .iter()
        .filter(|c| c.snapshot.is_some())
        .count();
    let total = input.competitors.len();

    let mut key_findings = vec![format!(
        "Competitive data available for {with_data} of {total} tracked competitors."
    )];
    if with_data < total {
        key_findings.push(
            "Comparative positioning is provisional until missing competitor data is captured."
                .to_string(),
        );
    }

    let competitor_names: Vec<&str> = input
        .competitors
        .iter()
        .map(|c| c.competitor.name.as_str())
        .collect();
    let competitive_intelligence = if competitor_names.is_empty() {
        format!(
            "No competitors are tracked for {} yet; the landscape view is empty.",
            input.product.name
        )
    } else {
        format!(
            "{} is tracked against {}. Detailed comparisons require captured website data.",
            input.product.name,
            competitor_names.join(", ")
        )
    };

    Analysis {
        id: Uuid::new_v4(),
        summary: AnalysisSummary {
            overall_position: MarketPosition::Competitive,
            opportunity_score: score,
            confidence_score: score,
            priority_score: score,
        },
        key_findings,
        competitive_intelligence,
        recommendations: Recommendations {
            immediate: vec![
                "Capture fresh snapshots for competitors with missing or stale data.".to_string(),
            ],
            short_term: vec![
                "Re-run the comparative report once competitor coverage improves.".to_string(),
            ],
            long_term: vec![
                "Review the tracked competitor set for relevance each quarter.".to_string(),
            ],
        },
        origin: AnalysisOrigin::Placeholder,
        usage: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnalysisStage {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

/// Shape the model is asked to reply with.
#[derive(Deserialize)]
struct WireFindings {
    #[serde(default)]
    overall_position: Option<String>,
    #[serde(default)]
    opportunity_score: Option<f64>,
    #[serde(default)]
    confidence_score: Option<f64>,
    #[serde(default)]
    priority_score: Option<f64>,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    competitive_intelligence: Option<String>,
    #[serde(default)]
    recommendations: Option<WireRecommendations>,
}

#[derive(Deserialize, Default)]
struct WireRecommendations {
    #[serde(default)]
    immediate: Vec<String>,
    #[serde(default)]
    short_term: Vec<String>,
    #[serde(default)]
    long_term: Vec<String>,
}

impl AnalysisStage {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Run the analysis. Never fails — the placeholder is the floor.
    pub async fn analyze(
        &self,
        input: &AnalysisInput,
        completeness_score: f64,
        cancel: &CancelToken,
    ) -> Analysis {
        let Some(generator) = &self.generator else {
            tracing::debug!("no generator configured, using placeholder analysis");
            return placeholder_analysis(input, completeness_score);
        };

        let request = GenerateRequest {
            system: Some(SYSTEM_FRAMING.to_string()),
            prompt: build_prompt(input),
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
        };

        let generated = with_cancel(
            cancel,
            tokio::time::timeout(self.timeout, generator.generate(request)),
        )
        .await;

        let response = match generated {
            None => {
                tracing::info!("analysis cancelled, using placeholder");
                return placeholder_analysis(input, completeness_score);
            }
            Some(Err(_elapsed)) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "analysis timed out");
                return placeholder_analysis(input, completeness_score);
            }
            Some(Ok(Err(err))) => {
                tracing::warn!(error = %err, "generation failed, using placeholder");
                return placeholder_analysis(input, completeness_score);
            }
            Some(Ok(Ok(response))) => response,
        };

        match parse_findings(&response.content) {
            Some(wire) => {
                let mut analysis = wire_to_analysis(wire);
                analysis.usage = response.usage;
                analysis
            }
            None => {
                tracing::warn!("undecodable analysis output, using placeholder");
                placeholder_analysis(input, completeness_score)
            }
        }
    }
}

const SYSTEM_FRAMING: &str = "You are a competitive intelligence analyst. Reply with a single \
JSON object and nothing else. Fields: overall_position (leading|competitive|trailing), \
opportunity_score, confidence_score, priority_score (0-100), key_findings (list of strings), \
competitive_intelligence (string), recommendations {immediate, short_term, long_term} \
(lists of strings).";

fn snippet(snapshot: &Snapshot, cap: usize) -> String {
    let text = snapshot
        .metadata
        .text
        .as_deref()
        .or(snapshot.metadata.html.as_deref())
        .unwrap_or("");
    text.chars().take(cap).collect()
}

fn build_prompt(input: &AnalysisInput) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "# Product\nname: {}\nwebsite: {}\n",
        input.product.name, input.product.website
    ));
    if let Some(positioning) = &input.product.positioning {
        prompt.push_str(&format!("positioning: {positioning}\n"));
    }
    if let Some(problem) = &input.product.problem_statement {
        prompt.push_str(&format!("problem: {problem}\n"));
    }
    if let Some(snapshot) = &input.product_snapshot {
        prompt.push_str(&format!("site excerpt:\n{}\n", snippet(snapshot, 2_000)));
    }

    prompt.push_str("\n# Competitors\n");
    for entry in &input.competitors {
        prompt.push_str(&format!(
            "## {} ({})\n",
            entry.competitor.name, entry.competitor.website
        ));
        match &entry.snapshot {
            Some(snapshot) => {
                prompt.push_str(&format!("site excerpt:\n{}\n", snippet(snapshot, 1_500)));
            }
            None => prompt.push_str("no captured website data\n"),
        }
    }

    prompt.push_str(&format!(
        "\n# Task\nfocus areas: {}\ndepth: {:?}\ninclude recommendations: {}\n",
        input.config.focus_areas.join(", "),
        input.config.depth,
        input.config.include_recommendations
    ));
    prompt
}

/// Pull the first JSON object out of the response body.
fn parse_findings(content: &str) -> Option<WireFindings> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(content.get(start..=end)?).ok()
}

fn wire_to_analysis(wire: WireFindings) -> Analysis {
    let overall_position = match wire.overall_position.as_deref() {
        Some("leading") => MarketPosition::Leading,
        Some("trailing") => MarketPosition::Trailing,
        _ => MarketPosition::Competitive,
    };
    let recommendations = wire.recommendations.unwrap_or_default();
    Analysis {
        id: Uuid::new_v4(),
        summary: AnalysisSummary {
            overall_position,
            opportunity_score: clamp_score(wire.opportunity_score.unwrap_or(50.0)),
            confidence_score: clamp_score(wire.confidence_score.unwrap_or(50.0)),
            priority_score: clamp_score(wire.priority_score.unwrap_or(50.0)),
        },
        key_findings: wire.key_findings,
        competitive_intelligence: wire.competitive_intelligence.unwrap_or_default(),
        recommendations: Recommendations {
            immediate: recommendations.immediate,
            short_term: recommendations.short_term,
            long_term: recommendations.long_term,
        },
        origin: AnalysisOrigin::Llm,
        usage: None,
    }
}
