//! Scrape scheduler.
//!
//! Translates per-project frequencies into cron triggers, fires refresh
//! runs through the collector, and enforces one concurrent run per project
//! (overlapping fires are dropped and logged). Firing errors never disable
//! a schedule; consecutive failures past the threshold flip the derived
//! status to `Degraded` and raise an alert.

pub mod cron;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use vg_domain::config::SchedulerConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{ReportSchedule, ScrapeFrequency};
use vg_domain::{CancelToken, Result};
use vg_engine::collector::SmartCollector;
use vg_store::Repository;

use crate::metrics::MetricsCollector;
use cron::{cron_next_tz, is_valid_cron, parse_tz};

/// RAII marker for a project's in-flight scheduled run.
struct RunGuard {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    project_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.project_id);
    }
}

pub struct Scheduler {
    repo: Arc<dyn Repository>,
    collector: Arc<SmartCollector>,
    metrics: Arc<MetricsCollector>,
    cfg: SchedulerConfig,
    tz: chrono_tz::Tz,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        collector: Arc<SmartCollector>,
        metrics: Arc<MetricsCollector>,
        cfg: SchedulerConfig,
    ) -> Self {
        let tz = parse_tz(&cfg.timezone);
        Self {
            repo,
            collector,
            metrics,
            cfg,
            tz,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn degraded_threshold(&self) -> u32 {
        self.cfg.degraded_threshold
    }

    /// Create (or replace) the schedule for a project.
    pub async fn schedule(&self, project_id: Uuid, frequency: ScrapeFrequency) -> Result<Uuid> {
        if self.repo.project(project_id).await?.is_none() {
            return Err(Error::new(ErrorKind::OwnerNotFound, "project not found"));
        }
        let cron_expr = frequency.cron();
        if !is_valid_cron(&cron_expr) {
            return Err(Error::validation(format!("invalid cron {cron_expr:?}")));
        }

        let mut schedule = match self.repo.schedule_for_project(project_id).await? {
            Some(existing) => existing,
            None => ReportSchedule::new(project_id, frequency.clone()),
        };
        schedule.frequency = frequency;
        schedule.cron = cron_expr;
        schedule.enabled = true;
        schedule.next_run = cron_next_tz(&schedule.cron, &Utc::now(), self.tz);
        schedule.updated_at = Utc::now();
        let schedule = self.repo.upsert_schedule(schedule).await?;
        tracing::info!(
            schedule_id = %schedule.id,
            project_id = %project_id,
            cron = %schedule.cron,
            next_run = ?schedule.next_run,
            "schedule registered"
        );
        Ok(schedule.id)
    }

    /// Pause a schedule. Returns false when it does not exist.
    pub async fn stop(&self, schedule_id: Uuid) -> Result<bool> {
        let Some(mut schedule) = self.repo.schedule(schedule_id).await? else {
            return Ok(false);
        };
        schedule.enabled = false;
        schedule.next_run = None;
        schedule.updated_at = Utc::now();
        self.repo.upsert_schedule(schedule).await?;
        tracing::info!(schedule_id = %schedule_id, "schedule paused");
        Ok(true)
    }

    /// Change a project's frequency (creates the schedule if missing).
    pub async fn update(&self, project_id: Uuid, frequency: ScrapeFrequency) -> Result<Uuid> {
        self.schedule(project_id, frequency).await
    }

    /// Manual trigger. Returns false when a run is already in flight for
    /// the project (the fire is dropped, mirroring tick overlap handling).
    pub async fn trigger(self: &Arc<Self>, project_id: Uuid) -> Result<bool> {
        let Some(schedule) = self.repo.schedule_for_project(project_id).await? else {
            return Err(Error::new(ErrorKind::OwnerNotFound, "no schedule for project"));
        };
        Ok(self.fire(schedule, true).await)
    }

    /// Evaluate due schedules and fire them. Called every tick.
    pub async fn tick(self: &Arc<Self>) {
        let schedules = match self.repo.list_schedules().await {
            Ok(schedules) => schedules,
            Err(err) => {
                tracing::warn!(error = %err, "schedule listing failed, skipping tick");
                return;
            }
        };
        let now = Utc::now();
        for schedule in schedules {
            if !schedule.enabled {
                continue;
            }
            match schedule.next_run {
                Some(next) if next <= now => {
                    self.fire(schedule, false).await;
                }
                Some(_) => {}
                None => {
                    // Never computed (legacy row): seed and move on.
                    let next = cron_next_tz(&schedule.cron, &now, self.tz);
                    let mut schedule = schedule;
                    schedule.next_run = next;
                    let _ = self.repo.upsert_schedule(schedule).await;
                }
            }
        }
    }

    /// Fire one schedule: advance its run bookkeeping, then spawn the
    /// refresh. Returns false when dropped due to an in-flight run.
    async fn fire(self: &Arc<Self>, schedule: ReportSchedule, manual: bool) -> bool {
        let project_id = schedule.project_id;
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(project_id) {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    project_id = %project_id,
                    manual,
                    "overlapping scheduled run dropped"
                );
                return false;
            }
        }
        let guard = RunGuard {
            in_flight: self.in_flight.clone(),
            project_id,
        };

        // last_run is set and next_run recomputed at firing time, so a
        // crashed run cannot replay the same window.
        let fired_at = Utc::now();
        let next_run = cron_next_tz(&schedule.cron, &fired_at, self.tz);
        if let Err(err) = self
            .repo
            .record_schedule_fired(schedule.id, fired_at, next_run)
            .await
        {
            tracing::error!(schedule_id = %schedule.id, error = %err, "schedule bookkeeping failed");
            return false;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_refresh(schedule).await;
        });
        true
    }

    async fn run_refresh(&self, schedule: ReportSchedule) {
        tracing::info!(
            schedule_id = %schedule.id,
            project_id = %schedule.project_id,
            "scheduled refresh starting"
        );
        let outcome = self
            .collector
            .refresh(schedule.project_id, &CancelToken::new())
            .await;

        match outcome {
            Ok(summary) => {
                let _ = self
                    .repo
                    .record_schedule_outcome(schedule.id, true, None)
                    .await;
                self.metrics.record_schedule_run(true);
                tracing::info!(
                    schedule_id = %schedule.id,
                    captured = summary.captured,
                    skipped_fresh = summary.skipped_fresh,
                    skipped_budget = summary.skipped_budget,
                    failed = summary.failed,
                    "scheduled refresh finished"
                );
            }
            Err(err) => {
                let _ = self
                    .repo
                    .record_schedule_outcome(schedule.id, false, Some(err.to_string()))
                    .await;
                self.metrics.record_schedule_run(false);
                tracing::warn!(
                    schedule_id = %schedule.id,
                    error = %err,
                    "scheduled refresh failed"
                );

                if let Ok(Some(updated)) = self.repo.schedule(schedule.id).await {
                    if updated.consecutive_failures >= self.cfg.degraded_threshold {
                        self.metrics.record_degraded_alert();
                        tracing::error!(
                            schedule_id = %schedule.id,
                            project_id = %schedule.project_id,
                            consecutive_failures = updated.consecutive_failures,
                            "schedule degraded, monitoring alert raised"
                        );
                    }
                }
            }
        }
    }

    /// Spawn the tick loop.
    pub fn spawn_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tick = std::time::Duration::from_secs(self.cfg.tick_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
