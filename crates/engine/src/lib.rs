//! Report pipeline: completeness scoring, smart data collection,
//! LLM-backed analysis, and report composition, wired together by
//! [`pipeline::ReportPipeline`].

pub mod analysis;
pub mod collector;
pub mod completeness;
pub mod compose;
pub mod pipeline;

pub use analysis::{Analysis, AnalysisInput, AnalysisStage, MarketPosition};
pub use collector::{CollectionResult, CompetitorData, DataQuality, DataSource, SmartCollector};
pub use completeness::{CompletenessChecker, CompletenessResult, Grade};
pub use compose::{ComposedReport, ReportComposer, ReportFormat, ReportTemplate};
pub use pipeline::{GenerateOptions, PipelineOutcome, PipelinePhase, ReportPipeline};
