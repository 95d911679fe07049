//! The standard report template and the render-context builder.

use std::collections::HashMap;

use chrono::Utc;

use crate::analysis::{Analysis, MarketPosition};
use crate::collector::{CollectionResult, DataQuality, DataSource};

use super::template::{RenderContext, ReportFormat, ReportTemplate, SectionTemplate};

pub const SECTION_EXECUTIVE_SUMMARY: &str = "executive_summary";
pub const SECTION_MARKET_POSITION: &str = "market_position";
pub const SECTION_FEATURE_COMPARISON: &str = "feature_comparison";
pub const SECTION_COMPETITIVE_INTELLIGENCE: &str = "competitive_intelligence";
pub const SECTION_STRATEGIC_RECOMMENDATIONS: &str = "strategic_recommendations";

impl ReportTemplate {
    /// The built-in comparative template.
    pub fn standard(format: ReportFormat) -> Self {
        Self {
            id: "standard".to_string(),
            name: "Comparative Report".to_string(),
            format,
            sections: vec![
                SectionTemplate {
                    id: SECTION_EXECUTIVE_SUMMARY.to_string(),
                    title: "Executive Summary".to_string(),
                    body: "{product_name} is currently {overall_position} across its tracked \
                           competitive set of {competitor_count} competitors. Opportunity score: \
                           {opportunity_score}/100, confidence: {confidence_score}/100 \
                           (data completeness {completeness_score}%, {data_freshness} inputs, \
                           generated {generated_at})."
                        .to_string(),
                },
                SectionTemplate {
                    id: SECTION_MARKET_POSITION.to_string(),
                    title: "Market Position".to_string(),
                    body: "Position: {overall_position}. Priority score {priority_score}/100.\n\n\
                           Key findings:\n{#key_findings}- {finding}\n{/key_findings}"
                        .to_string(),
                },
                SectionTemplate {
                    id: SECTION_FEATURE_COMPARISON.to_string(),
                    title: "Feature Comparison".to_string(),
                    body: "Tracked competitors and their data inputs:\n\
                           {#competitors}- {name} ({website}) — source: {source}, quality: \
                           {quality}\n{/competitors}"
                        .to_string(),
                },
                SectionTemplate {
                    id: SECTION_COMPETITIVE_INTELLIGENCE.to_string(),
                    title: "Competitive Intelligence".to_string(),
                    body: "{competitive_intelligence}".to_string(),
                },
                SectionTemplate {
                    id: SECTION_STRATEGIC_RECOMMENDATIONS.to_string(),
                    title: "Strategic Recommendations".to_string(),
                    body: "Immediate:\n{#immediate}- {item}\n{/immediate}\n\
                           Short term:\n{#short_term}- {item}\n{/short_term}\n\
                           Long term:\n{#long_term}- {item}\n{/long_term}"
                        .to_string(),
                },
            ],
        }
    }

    /// Resolve a template by id; unknown ids fall back to standard markdown.
    pub fn by_id(id: Option<&str>) -> Self {
        match id {
            Some("standard_html") => Self::standard(ReportFormat::Html),
            Some("standard") | None => Self::standard(ReportFormat::Markdown),
            Some(other) => {
                tracing::warn!(template = other, "unknown template id, using standard");
                Self::standard(ReportFormat::Markdown)
            }
        }
    }
}

fn item(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn position_label(position: MarketPosition) -> &'static str {
    match position {
        MarketPosition::Leading => "leading",
        MarketPosition::Competitive => "competitive",
        MarketPosition::Trailing => "trailing",
    }
}

fn source_label(source: DataSource) -> &'static str {
    match source {
        DataSource::FreshSnapshot => "fresh snapshot",
        DataSource::ExistingSnapshot => "existing snapshot",
        DataSource::FastCollection => "live capture",
        DataSource::BasicMetadata => "basic metadata",
    }
}

fn quality_label(quality: DataQuality) -> &'static str {
    match quality {
        DataQuality::High => "high",
        DataQuality::Medium => "medium",
        DataQuality::Low => "low",
    }
}

/// Build the substitution context from the analysis and the collection.
pub fn build_context(analysis: &Analysis, collection: &CollectionResult) -> RenderContext {
    let mut ctx = RenderContext::default();
    let product = &collection.product.product;

    ctx.set("product_name", product.name.clone());
    ctx.set("product_website", product.website.clone());
    if let Some(positioning) = &product.positioning {
        ctx.set("product_positioning", positioning.clone());
    }

    ctx.set(
        "overall_position",
        position_label(analysis.summary.overall_position),
    );
    ctx.set(
        "opportunity_score",
        format!("{:.0}", analysis.summary.opportunity_score),
    );
    ctx.set(
        "confidence_score",
        format!("{:.0}", analysis.summary.confidence_score),
    );
    ctx.set(
        "priority_score",
        format!("{:.0}", analysis.summary.priority_score),
    );
    ctx.set(
        "competitive_intelligence",
        analysis.competitive_intelligence.clone(),
    );

    ctx.set("competitor_count", collection.competitors.len().to_string());
    ctx.set(
        "completeness_score",
        format!("{:.0}", collection.completeness_score),
    );
    ctx.set(
        "data_freshness",
        format!("{:?}", collection.freshness).to_lowercase(),
    );
    ctx.set("generated_at", Utc::now().format("%Y-%m-%d %H:%M UTC").to_string());

    ctx.set_list(
        "competitors",
        collection
            .competitors
            .iter()
            .map(|c| {
                item(&[
                    ("name", c.competitor.name.clone()),
                    ("website", c.competitor.website.clone()),
                    ("source", source_label(c.data_source).to_string()),
                    ("quality", quality_label(c.data_quality).to_string()),
                ])
            })
            .collect(),
    );
    ctx.set_list(
        "key_findings",
        analysis
            .key_findings
            .iter()
            .map(|f| item(&[("finding", f.clone())]))
            .collect(),
    );
    ctx.set_list(
        "immediate",
        analysis
            .recommendations
            .immediate
            .iter()
            .map(|r| item(&[("item", r.clone())]))
            .collect(),
    );
    ctx.set_list(
        "short_term",
        analysis
            .recommendations
            .short_term
            .iter()
            .map(|r| item(&[("item", r.clone())]))
            .collect(),
    );
    ctx.set_list(
        "long_term",
        analysis
            .recommendations
            .long_term
            .iter()
            .map(|r| item(&[("item", r.clone())]))
            .collect(),
    );

    ctx
}
