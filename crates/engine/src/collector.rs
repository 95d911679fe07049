//! Smart data collector.
//!
//! Assembles the analysis input for a project: product form data straight
//! from the store, and per-competitor data by preference order — fresh
//! stored snapshot, governed live capture, older valid snapshot, bare
//! metadata. Competitor work runs in parallel under the governor's caps;
//! the collection deadline yields a best partial result, never a failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use uuid::Uuid;

use vg_domain::config::{PipelineConfig, ScraperConfig};
use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{Competitor, DataFreshness, Product, Snapshot, SnapshotOwner};
use vg_domain::{CancelToken, Result};
use vg_scraper::browser::validate_capture_url;
use vg_scraper::{CaptureOptions, CaptureWorker, Governor, SnapshotValidator};
use vg_store::Repository;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Stored snapshot inside the freshness window.
    FreshSnapshot,
    /// Older valid snapshot accepted as fallback.
    ExistingSnapshot,
    /// Captured live during this collection.
    FastCollection,
    /// Known name/website only.
    BasicMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug)]
pub struct CompetitorData {
    pub competitor: Competitor,
    pub snapshot: Option<Snapshot>,
    pub data_source: DataSource,
    pub data_quality: DataQuality,
    /// Why this competitor's data is degraded, when it is.
    pub limitation: Option<String>,
}

/// Product form data: source `form_input`, freshness `immediate`.
#[derive(Clone, Debug)]
pub struct ProductData {
    pub product: Product,
    pub snapshot: Option<Snapshot>,
}

#[derive(Clone, Debug)]
pub struct CollectionResult {
    pub product: ProductData,
    pub competitors: Vec<CompetitorData>,
    pub completeness_score: f64,
    pub freshness: DataFreshness,
    /// True when the deadline cut collection short.
    pub partial: bool,
    pub captured_now: usize,
    pub from_existing: usize,
    pub fallback_only: usize,
    pub duration_ms: u64,
}

#[derive(Clone, Debug)]
pub struct CollectOptions {
    pub budget: Duration,
    pub product_id: Option<Uuid>,
    /// Accept an older valid snapshot when capture is unavailable.
    pub allow_stale: bool,
    /// ENABLE_FRESH_SNAPSHOT_REQUIREMENT: refuse stale fallbacks outright.
    pub require_fresh: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(60),
            product_id: None,
            allow_stale: true,
            require_fresh: false,
        }
    }
}

/// Outcome of a scheduled refresh run.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RefreshSummary {
    pub total: usize,
    pub captured: usize,
    pub skipped_fresh: usize,
    pub skipped_budget: usize,
    pub failed: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SmartCollector {
    repo: Arc<dyn Repository>,
    worker: Arc<CaptureWorker>,
    governor: Arc<Governor>,
    pipeline_cfg: PipelineConfig,
    capture_opts: CaptureOptions,
}

/// Everything one competitor task needs, cloneable into the spawn.
struct TaskCtx {
    repo: Arc<dyn Repository>,
    worker: Arc<CaptureWorker>,
    governor: Arc<Governor>,
    pipeline_cfg: PipelineConfig,
    capture_opts: CaptureOptions,
    project_id: Uuid,
    deadline: Instant,
    cancel: CancelToken,
    allow_stale: bool,
    require_fresh: bool,
}

impl SmartCollector {
    pub fn new(
        repo: Arc<dyn Repository>,
        worker: Arc<CaptureWorker>,
        governor: Arc<Governor>,
        pipeline_cfg: PipelineConfig,
        scraper_cfg: &ScraperConfig,
    ) -> Self {
        Self {
            repo,
            worker,
            governor,
            pipeline_cfg,
            capture_opts: CaptureOptions::from_config(scraper_cfg),
        }
    }

    /// Assemble the analysis input for a project. Returns the best result
    /// reachable within `opts.budget`; `partial` marks a cut-short run.
    pub async fn collect(
        &self,
        project_id: Uuid,
        opts: &CollectOptions,
        cancel: &CancelToken,
    ) -> Result<CollectionResult> {
        let started = Instant::now();
        let deadline = started + opts.budget;

        let graph = self
            .repo
            .find_project_with_graph(project_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;

        let product = match opts.product_id {
            Some(id) => graph.products.iter().find(|p| p.id == id),
            None => graph.products.first(),
        }
        .cloned()
        .ok_or_else(|| Error::validation("project has no product to report on"))?;

        let product_snapshot = self
            .repo
            .latest_snapshot(SnapshotOwner::Product(product.id))
            .await?
            .filter(|s| self.is_valid(s));
        let product_data = ProductData {
            product,
            snapshot: product_snapshot,
        };

        // Fan competitor work out under a collection-local cancel token so
        // the deadline (or the caller) can abandon outstanding captures.
        let local_cancel = CancelToken::new();
        let mut tasks: JoinSet<(usize, CompetitorData)> = JoinSet::new();
        for (idx, competitor) in graph.competitors.iter().enumerate() {
            let ctx = TaskCtx {
                repo: self.repo.clone(),
                worker: self.worker.clone(),
                governor: self.governor.clone(),
                pipeline_cfg: self.pipeline_cfg.clone(),
                capture_opts: self.capture_opts.clone(),
                project_id,
                deadline,
                cancel: local_cancel.clone(),
                allow_stale: opts.allow_stale,
                require_fresh: opts.require_fresh,
            };
            let competitor = competitor.clone();
            tasks.spawn(async move { (idx, collect_competitor(ctx, competitor).await) });
        }

        let mut slots: Vec<Option<CompetitorData>> = vec![None; graph.competitors.len()];
        let mut cut_short = false;
        let mut ticker = tokio::time::interval(Duration::from_millis(25));
        while !tasks.is_empty() {
            tokio::select! {
                next = tasks.join_next() => match next {
                    Some(Ok((idx, data))) => {
                        if let Some(slot) = slots.get_mut(idx) {
                            *slot = Some(data);
                        }
                    }
                    Some(Err(join_err)) => {
                        tracing::warn!(error = %join_err, "competitor collection task failed");
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    cut_short = true;
                    break;
                }
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        cut_short = true;
                        break;
                    }
                }
            }
        }

        if cut_short {
            // Let tasks observe cancellation (and record cancelled
            // snapshots, release leases) before the hard abort.
            local_cancel.cancel();
            let grace = tokio::time::sleep(Duration::from_millis(500));
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    next = tasks.join_next() => match next {
                        Some(Ok((idx, data))) => {
                            if let Some(slot) = slots.get_mut(idx) {
                                *slot = Some(data);
                            }
                        }
                        Some(Err(_)) => {}
                        None => break,
                    },
                    _ = &mut grace => {
                        tasks.abort_all();
                        while let Some(res) = tasks.join_next().await {
                            if let Ok((idx, data)) = res {
                                if let Some(slot) = slots.get_mut(idx) {
                                    *slot = Some(data);
                                }
                            }
                        }
                        break;
                    }
                }
            }
        }

        let competitors: Vec<CompetitorData> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    basic_fallback(
                        graph.competitors[idx].clone(),
                        "collection deadline elapsed before this competitor finished",
                    )
                })
            })
            .collect();

        let completeness_score = completeness_score(&product_data, &competitors);
        let freshness = overall_freshness(&competitors);
        let captured_now = count_source(&competitors, DataSource::FastCollection);
        let from_existing = count_source(&competitors, DataSource::FreshSnapshot)
            + count_source(&competitors, DataSource::ExistingSnapshot);
        let fallback_only = count_source(&competitors, DataSource::BasicMetadata);

        tracing::info!(
            project_id = %project_id,
            competitors = competitors.len(),
            captured_now,
            from_existing,
            fallback_only,
            completeness = completeness_score,
            partial = cut_short,
            "collection assembled"
        );

        Ok(CollectionResult {
            product: product_data,
            competitors,
            completeness_score,
            freshness,
            partial: cut_short,
            captured_now,
            from_existing,
            fallback_only,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Scheduled refresh (scheduler firing): re-capture every owner whose newest
    /// valid snapshot is outside the freshness window, budget permitting.
    pub async fn refresh(&self, project_id: Uuid, cancel: &CancelToken) -> Result<RefreshSummary> {
        let graph = self
            .repo
            .find_project_with_graph(project_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;

        let mut targets: Vec<(SnapshotOwner, String)> = Vec::new();
        for product in &graph.products {
            targets.push((SnapshotOwner::Product(product.id), product.website.clone()));
        }
        for competitor in &graph.competitors {
            targets.push((
                SnapshotOwner::Competitor(competitor.id),
                competitor.website.clone(),
            ));
        }

        let mut summary = RefreshSummary {
            total: targets.len(),
            ..RefreshSummary::default()
        };
        let window = self.pipeline_cfg.freshness_window();
        let mut tasks: JoinSet<std::result::Result<bool, ()>> = JoinSet::new();

        for (owner, url) in targets {
            if cancel.is_cancelled() {
                break;
            }
            let now = Utc::now();
            let fresh = self
                .repo
                .latest_snapshot(owner)
                .await?
                .is_some_and(|s| s.is_fresh(now, window) && self.is_valid(&s));
            if fresh {
                summary.skipped_fresh += 1;
                continue;
            }
            if !self.governor.budget_ok(now) {
                summary.skipped_budget += 1;
                continue;
            }

            let worker = self.worker.clone();
            let governor = self.governor.clone();
            let capture_opts = self.capture_opts.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let host = match validate_capture_url(&url) {
                    Ok(parsed) => parsed.host_str().unwrap_or_default().to_string(),
                    Err(_) => return Err(()),
                };
                let lease = match governor.acquire(project_id, host.as_str()).await {
                    Ok(lease) => lease,
                    Err(_) => return Err(()),
                };
                governor.record_capture(Utc::now());
                let outcome = worker.capture(owner, &url, &capture_opts, &cancel).await;
                drop(lease);
                match outcome {
                    Ok(out) => {
                        governor.record_outcome(&host, out.capture.success);
                        Ok(out.capture.success)
                    }
                    Err(_) => Err(()),
                }
            });
        }

        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Ok(true)) => summary.captured += 1,
                Ok(Ok(false)) | Ok(Err(())) => summary.failed += 1,
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "refresh task failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn is_valid(&self, snapshot: &Snapshot) -> bool {
        SnapshotValidator::validate_snapshot(snapshot, self.pipeline_cfg.min_content_bytes)
            .is_valid
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-competitor collection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn basic_fallback(competitor: Competitor, reason: &str) -> CompetitorData {
    CompetitorData {
        competitor,
        snapshot: None,
        data_source: DataSource::BasicMetadata,
        data_quality: DataQuality::Low,
        limitation: Some(reason.to_string()),
    }
}

async fn collect_competitor(ctx: TaskCtx, competitor: Competitor) -> CompetitorData {
    let owner = SnapshotOwner::Competitor(competitor.id);
    let now = Utc::now();
    let window = ctx.pipeline_cfg.freshness_window();

    let history = match ctx.repo.recent_snapshots(owner, 10).await {
        Ok(history) => history,
        Err(err) => {
            tracing::warn!(competitor = %competitor.name, error = %err, "snapshot read failed");
            return basic_fallback(competitor, "snapshot store unavailable");
        }
    };
    let freshest_valid = history
        .iter()
        .find(|s| {
            SnapshotValidator::validate_snapshot(s, ctx.pipeline_cfg.min_content_bytes).is_valid
        })
        .cloned();

    // 1. Fresh stored snapshot wins outright.
    if let Some(snapshot) = &freshest_valid {
        if snapshot.is_fresh(now, window) {
            return CompetitorData {
                competitor,
                snapshot: Some(snapshot.clone()),
                data_source: DataSource::FreshSnapshot,
                data_quality: DataQuality::High,
                limitation: None,
            };
        }
    }

    // 2. Attempt a governed live capture.
    let mut limitation = None;
    if ctx.cancel.is_cancelled() {
        limitation = Some("collection cancelled before capture".to_string());
    } else if !ctx.governor.budget_ok(now) {
        limitation = Some("capture budget exhausted".to_string());
    } else {
        match validate_capture_url(&competitor.website) {
            Err(err) => {
                limitation = Some(format!("unusable website url: {}", err.message));
            }
            Ok(url) => {
                let host = url.host_str().unwrap_or_default().to_string();
                match timeout_at(ctx.deadline, ctx.governor.acquire(ctx.project_id, &host)).await
                {
                    Err(_) => {
                        limitation = Some("no capture slot before the deadline".to_string());
                    }
                    Ok(Err(err)) => {
                        limitation = Some(format!("capture unavailable: {}", err.kind.code()));
                    }
                    Ok(Ok(lease)) => {
                        ctx.governor.record_capture(Utc::now());
                        let remaining = ctx.deadline.saturating_duration_since(Instant::now());
                        let opts = ctx.capture_opts.clamped_to(remaining);
                        let outcome = ctx
                            .worker
                            .capture(owner, &competitor.website, &opts, &ctx.cancel)
                            .await;
                        drop(lease);
                        match outcome {
                            Ok(out) => {
                                ctx.governor.record_outcome(&host, out.capture.success);
                                if out.capture.success {
                                    return CompetitorData {
                                        competitor,
                                        snapshot: Some(out.snapshot),
                                        data_source: DataSource::FastCollection,
                                        data_quality: DataQuality::High,
                                        limitation: None,
                                    };
                                }
                                limitation = Some(format!(
                                    "capture failed: {}",
                                    out.capture
                                        .error
                                        .map(|k| k.code())
                                        .unwrap_or("unknown")
                                ));
                            }
                            Err(err) => {
                                limitation = Some(format!("capture failed: {}", err.kind.code()));
                            }
                        }
                    }
                }
            }
        }
    }

    // 3. Older valid snapshot, when allowed.
    if ctx.allow_stale && !ctx.require_fresh {
        if let Some(snapshot) = freshest_valid {
            let age_hours = snapshot.age(now).num_hours();
            return CompetitorData {
                competitor,
                snapshot: Some(snapshot),
                data_source: DataSource::ExistingSnapshot,
                data_quality: DataQuality::Medium,
                limitation: Some(format!("using stale snapshot ({age_hours}h old)")),
            };
        }
    }

    // 4. Bare metadata.
    basic_fallback(
        competitor,
        &limitation.unwrap_or_else(|| "no usable snapshot available".to_string()),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn count_source(competitors: &[CompetitorData], source: DataSource) -> usize {
    competitors
        .iter()
        .filter(|c| c.data_source == source)
        .count()
}

fn source_factor(source: DataSource) -> f64 {
    match source {
        DataSource::FreshSnapshot | DataSource::FastCollection => 1.0,
        DataSource::ExistingSnapshot => 0.7,
        DataSource::BasicMetadata => 0.2,
    }
}

/// 30% product readiness, 70% averaged competitor input quality.
fn completeness_score(product: &ProductData, competitors: &[CompetitorData]) -> f64 {
    let mut product_factor: f64 = 0.6;
    if product.product.positioning.is_some() {
        product_factor += 0.2;
    }
    if product.snapshot.is_some() {
        product_factor += 0.2;
    }

    let competitor_factor = if competitors.is_empty() {
        0.5
    } else {
        competitors
            .iter()
            .map(|c| source_factor(c.data_source))
            .sum::<f64>()
            / competitors.len() as f64
    };

    (product_factor.min(1.0) * 30.0 + competitor_factor * 70.0).clamp(0.0, 100.0)
}

/// Freshness rollup. Product form data is always immediate, so reports with
/// live-or-fresh competitor inputs classify as `new`.
fn overall_freshness(competitors: &[CompetitorData]) -> DataFreshness {
    let fresh = count_source(competitors, DataSource::FastCollection)
        + count_source(competitors, DataSource::FreshSnapshot);
    let existing = count_source(competitors, DataSource::ExistingSnapshot);
    let with_data = fresh + existing;

    if competitors.is_empty() || with_data == 0 {
        DataFreshness::Basic
    } else if existing == 0 {
        DataFreshness::New
    } else if fresh == 0 {
        DataFreshness::Existing
    } else {
        DataFreshness::Mixed
    }
}
