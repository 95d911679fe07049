//! Shared application state passed to every API handler, plus the wiring
//! that assembles the service graph from injected collaborators.

use std::sync::Arc;

use vg_domain::config::Config;
use vg_engine::analysis::AnalysisStage;
use vg_engine::collector::SmartCollector;
use vg_engine::completeness::CompletenessChecker;
use vg_engine::compose::ReportComposer;
use vg_engine::pipeline::ReportPipeline;
use vg_providers::TextGenerator;
use vg_scraper::validator::ValidatorConfig;
use vg_scraper::{CaptureWorker, Governor, PageFetcher, SnapshotValidator};
use vg_store::cache::ResolutionCache;
use vg_store::{NamedLockMap, Repository};

use crate::coordinator::ReportCoordinator;
use crate::metrics::MetricsCollector;
use crate::queue::TaskQueue;
use crate::scheduler::Scheduler;
use crate::status::StatusPublisher;

/// Shared application state. Fields are grouped by concern:
/// - **storage & policy** — repository, creation locks, resolution cache
/// - **capture** — governor, validator, collector
/// - **reporting** — pipeline, coordinator, queue
/// - **observability** — status publisher, metrics
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Storage & policy ──────────────────────────────────────────────
    pub repo: Arc<dyn Repository>,
    pub creation_locks: Arc<NamedLockMap>,
    pub resolution_cache: Arc<ResolutionCache>,

    // ── Capture ───────────────────────────────────────────────────────
    pub governor: Arc<Governor>,
    pub validator: Arc<SnapshotValidator>,
    pub collector: Arc<SmartCollector>,

    // ── Reporting ─────────────────────────────────────────────────────
    pub pipeline: Arc<ReportPipeline>,
    pub coordinator: Arc<ReportCoordinator>,
    pub queue: Arc<TaskQueue>,
    pub scheduler: Arc<Scheduler>,

    // ── Observability ─────────────────────────────────────────────────
    pub status: Arc<StatusPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// Wire the full service graph. The repository, page fetcher, and text
    /// generator are capability injections; everything else is owned here.
    pub fn build(
        config: Arc<Config>,
        repo: Arc<dyn Repository>,
        fetcher: Arc<dyn PageFetcher>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let governor = Arc::new(Governor::new(config.governor.clone()));
        let validator = Arc::new(SnapshotValidator::new(
            repo.clone(),
            ValidatorConfig::from_pipeline(&config.pipeline),
        ));
        let worker = Arc::new(CaptureWorker::new(fetcher, repo.clone()));
        let collector = Arc::new(SmartCollector::new(
            repo.clone(),
            worker.clone(),
            governor.clone(),
            config.pipeline.clone(),
            &config.scraper,
        ));

        let pipeline = Arc::new(ReportPipeline::new(
            repo.clone(),
            CompletenessChecker::new(repo.clone(), config.pipeline.clone()),
            SmartCollector::new(
                repo.clone(),
                worker,
                governor.clone(),
                config.pipeline.clone(),
                &config.scraper,
            ),
            AnalysisStage::new(generator, config.pipeline.analysis_timeout()),
            ReportComposer::new(repo.clone(), config.pipeline.clone()),
            &config,
        ));

        let queue = Arc::new(TaskQueue::new(
            config.queue.clone(),
            config.coordinator.queue_slot_estimate(),
        ));
        let status = Arc::new(StatusPublisher::new(config.features.real_time_updates));
        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));

        let coordinator = Arc::new(ReportCoordinator::new(
            config.clone(),
            pipeline.clone(),
            queue.clone(),
            status.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            repo.clone(),
            collector.clone(),
            metrics.clone(),
            config.scheduler.clone(),
        ));

        Self {
            resolution_cache: Arc::new(ResolutionCache::new(config.cache.ttl())),
            creation_locks: Arc::new(NamedLockMap::new()),
            config,
            repo,
            governor,
            validator,
            collector,
            pipeline,
            coordinator,
            queue,
            scheduler,
            status,
            metrics,
        }
    }
}
