//! Partial-data handling: per-section limitation notices, the trailing
//! "Data Completeness & Limitations" section, and the confidence clamp.

use serde::Serialize;

use vg_domain::model::ReportSection;

use crate::collector::{CollectionResult, DataSource};

use super::sections::{SECTION_COMPETITIVE_INTELLIGENCE, SECTION_FEATURE_COMPARISON};

pub const SECTION_LIMITATIONS: &str = "data_limitations";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapImpact {
    High,
    Medium,
    Low,
}

/// One missing or degraded input, listed by impact.
#[derive(Clone, Debug, Serialize)]
pub struct DataGap {
    pub subject: String,
    pub impact: GapImpact,
    pub can_be_improved: bool,
    pub description: String,
    pub recommendation: String,
}

/// Derive the gap list from a collection. Bare-metadata competitors are
/// high impact; stale fallbacks medium; a missing product snapshot low.
pub fn collect_gaps(collection: &CollectionResult) -> Vec<DataGap> {
    let mut gaps = Vec::new();

    for entry in &collection.competitors {
        match entry.data_source {
            DataSource::BasicMetadata => gaps.push(DataGap {
                subject: entry.competitor.name.clone(),
                impact: GapImpact::High,
                can_be_improved: true,
                description: entry
                    .limitation
                    .clone()
                    .unwrap_or_else(|| "no captured website data".to_string()),
                recommendation: format!(
                    "Capture {} once it becomes reachable.",
                    entry.competitor.website
                ),
            }),
            DataSource::ExistingSnapshot => gaps.push(DataGap {
                subject: entry.competitor.name.clone(),
                impact: GapImpact::Medium,
                can_be_improved: true,
                description: entry
                    .limitation
                    .clone()
                    .unwrap_or_else(|| "stale snapshot in use".to_string()),
                recommendation: "Schedule a fresh capture to replace the stale input.".to_string(),
            }),
            DataSource::FreshSnapshot | DataSource::FastCollection => {}
        }
    }

    if collection.product.snapshot.is_none() {
        gaps.push(DataGap {
            subject: collection.product.product.name.clone(),
            impact: GapImpact::Low,
            can_be_improved: true,
            description: "product website has no valid snapshot; analysis used form data only"
                .to_string(),
            recommendation: "Capture the product site to enrich self-comparison.".to_string(),
        });
    }

    gaps.sort_by_key(|g| match g.impact {
        GapImpact::High => 0,
        GapImpact::Medium => 1,
        GapImpact::Low => 2,
    });
    gaps
}

/// Notice prepended to a section whose inputs are degraded.
pub fn limitation_notice(section_id: &str, gaps: &[DataGap]) -> Option<String> {
    let affected: Vec<&DataGap> = match section_id {
        SECTION_FEATURE_COMPARISON | SECTION_COMPETITIVE_INTELLIGENCE => gaps
            .iter()
            .filter(|g| g.impact != GapImpact::Low)
            .collect(),
        _ => return None,
    };
    if affected.is_empty() {
        return None;
    }
    let names: Vec<&str> = affected.iter().map(|g| g.subject.as_str()).collect();
    Some(format!(
        "> Data limitation: incomplete inputs for {}. Treat this section as provisional.",
        names.join(", ")
    ))
}

fn impact_label(impact: GapImpact) -> &'static str {
    match impact {
        GapImpact::High => "high",
        GapImpact::Medium => "medium",
        GapImpact::Low => "low",
    }
}

/// The trailing limitations section.
pub fn limitations_section(gaps: &[DataGap], completeness_score: f64, order: u32) -> ReportSection {
    let mut body = format!(
        "Data completeness for this report: {completeness_score:.0}%.\n\nGaps by impact:\n"
    );
    for gap in gaps {
        body.push_str(&format!(
            "- [{}] {}: {} (improvable: {}) — {}\n",
            impact_label(gap.impact),
            gap.subject,
            gap.description,
            if gap.can_be_improved { "yes" } else { "no" },
            gap.recommendation
        ));
    }
    ReportSection {
        id: SECTION_LIMITATIONS.to_string(),
        title: "Data Completeness & Limitations".to_string(),
        body,
        order,
    }
}

/// Composer clamp: `confidence ≤ completeness − 10`, floored at zero.
pub fn clamp_confidence(confidence: f64, completeness: f64) -> f64 {
    confidence.min((completeness - 10.0).max(0.0))
}
