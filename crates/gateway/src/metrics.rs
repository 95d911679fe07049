//! Metrics collector.
//!
//! Counters, a bounded duration reservoir for percentiles, per-error and
//! per-project counts, hourly/daily buckets with retention, queue depth,
//! and cost-per-report accounting. Cancelled runs are tracked but excluded
//! from failure-rate SLIs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use vg_domain::config::MetricsConfig;
use vg_domain::error::ErrorKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Timeframe {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Some(Self::Hourly),
            "daily" | "day" => Some(Self::Daily),
            "weekly" | "week" => Some(Self::Weekly),
            "monthly" | "month" => Some(Self::Monthly),
            _ => None,
        }
    }

    fn window(self) -> chrono::Duration {
        match self {
            Self::Hourly => chrono::Duration::hours(1),
            Self::Daily => chrono::Duration::days(1),
            Self::Weekly => chrono::Duration::days(7),
            Self::Monthly => chrono::Duration::days(30),
        }
    }
}

/// Handle returned by `record_start`; closed by `record_complete`.
pub struct RunCtx {
    pub correlation_id: Uuid,
    pub project_id: Uuid,
    started: Instant,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunOutcome {
    pub success: bool,
    pub cancelled: bool,
    pub timed_out: bool,
    pub error_kind: Option<ErrorKind>,
    pub completeness_score: Option<f64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
struct BucketStats {
    success: u64,
    failure: u64,
    cancelled: u64,
    duration_total_ms: u64,
    completeness_total: f64,
    completeness_count: u64,
    cost: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DashboardSnapshot {
    pub timeframe: Timeframe,
    pub started: u64,
    pub success: u64,
    pub failure: u64,
    pub cancelled: u64,
    pub timeouts: u64,
    /// success / (success + failure); cancelled excluded.
    pub success_rate: f64,
    pub active: u64,
    pub queue_depth: u64,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
    pub throughput_per_hour: f64,
    pub avg_completeness: f64,
    pub total_cost_usd: f64,
    pub avg_cost_per_report_usd: f64,
    pub top_errors: Vec<(String, u64)>,
    pub top_projects: Vec<(Uuid, u64)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BucketView {
    pub key: String,
    pub success: u64,
    pub failure: u64,
    pub cancelled: u64,
    pub avg_duration_ms: f64,
    pub avg_completeness: f64,
    pub cost_usd: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalyticsReport {
    pub timeframe: Timeframe,
    pub buckets: Vec<BucketView>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct MetricsInner {
    started: u64,
    success: u64,
    failure: u64,
    cancelled: u64,
    timeouts: u64,
    active: u64,
    queue_depth: u64,
    durations: VecDeque<u64>,
    per_error: HashMap<&'static str, u64>,
    per_project: HashMap<Uuid, u64>,
    hourly: BTreeMap<DateTime<Utc>, BucketStats>,
    daily: BTreeMap<NaiveDate, BucketStats>,
    completeness_total: f64,
    completeness_count: u64,
    total_cost: f64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    schedule_success: u64,
    schedule_failure: u64,
    degraded_alerts: u64,
    zombie_reports: u64,
}

pub struct MetricsCollector {
    cfg: MetricsConfig,
    inner: Mutex<MetricsInner>,
}

impl MetricsCollector {
    pub fn new(cfg: MetricsConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    pub fn record_start(&self, project_id: Uuid) -> RunCtx {
        let mut inner = self.inner.lock();
        inner.started += 1;
        inner.active += 1;
        *inner.per_project.entry(project_id).or_insert(0) += 1;
        RunCtx {
            correlation_id: Uuid::new_v4(),
            project_id,
            started: Instant::now(),
        }
    }

    pub fn record_complete(&self, ctx: &RunCtx, outcome: &RunOutcome) {
        let duration_ms = ctx.started.elapsed().as_millis() as u64;
        let cost = self.cost_of(outcome.input_tokens, outcome.output_tokens);
        let now = Utc::now();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.active = inner.active.saturating_sub(1);

        if outcome.cancelled {
            inner.cancelled += 1;
        } else if outcome.success {
            inner.success += 1;
        } else {
            inner.failure += 1;
        }
        if outcome.timed_out {
            inner.timeouts += 1;
        }
        if let Some(kind) = outcome.error_kind {
            *inner.per_error.entry(kind.code()).or_insert(0) += 1;
        }

        inner.durations.push_back(duration_ms);
        while inner.durations.len() > self.cfg.duration_reservoir_size {
            inner.durations.pop_front();
        }

        if let Some(score) = outcome.completeness_score {
            inner.completeness_total += score;
            inner.completeness_count += 1;
        }
        inner.total_cost += cost;
        inner.total_input_tokens += outcome.input_tokens;
        inner.total_output_tokens += outcome.output_tokens;

        let hour = truncate_hour(now);
        let day = now.date_naive();
        for stats in [
            inner.hourly.entry(hour).or_default(),
            inner.daily.entry(day).or_default(),
        ] {
            if outcome.cancelled {
                stats.cancelled += 1;
            } else if outcome.success {
                stats.success += 1;
            } else {
                stats.failure += 1;
            }
            stats.duration_total_ms += duration_ms;
            if let Some(score) = outcome.completeness_score {
                stats.completeness_total += score;
                stats.completeness_count += 1;
            }
            stats.cost += cost;
        }

        // Retention.
        let hourly_cutoff = now - chrono::Duration::hours(self.cfg.retention_hours);
        let daily_cutoff = (now - chrono::Duration::days(self.cfg.retention_days)).date_naive();
        inner.hourly.retain(|at, _| *at >= hourly_cutoff);
        inner.daily.retain(|at, _| *at >= daily_cutoff);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.inner.lock().queue_depth = depth as u64;
    }

    pub fn record_schedule_run(&self, success: bool) {
        let mut inner = self.inner.lock();
        if success {
            inner.schedule_success += 1;
        } else {
            inner.schedule_failure += 1;
        }
    }

    pub fn record_degraded_alert(&self) {
        self.inner.lock().degraded_alerts += 1;
    }

    pub fn record_zombie_reports(&self, count: u64) {
        self.inner.lock().zombie_reports += count;
    }

    fn cost_of(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1_000.0 * self.cfg.cost_per_1k_input_tokens
            + output_tokens as f64 / 1_000.0 * self.cfg.cost_per_1k_output_tokens
    }

    // ── Views ────────────────────────────────────────────────────────

    pub fn snapshot_dashboard(&self, timeframe: Timeframe) -> DashboardSnapshot {
        let inner = self.inner.lock();
        let now = Utc::now();
        let cutoff = now - timeframe.window();

        // Windowed counters from hourly buckets (daily for long frames).
        let (win_success, win_failure, win_cancelled) = match timeframe {
            Timeframe::Hourly | Timeframe::Daily => inner
                .hourly
                .range(truncate_hour(cutoff)..)
                .fold((0, 0, 0), |acc, (_, s)| {
                    (acc.0 + s.success, acc.1 + s.failure, acc.2 + s.cancelled)
                }),
            Timeframe::Weekly | Timeframe::Monthly => inner
                .daily
                .range(cutoff.date_naive()..)
                .fold((0, 0, 0), |acc, (_, s)| {
                    (acc.0 + s.success, acc.1 + s.failure, acc.2 + s.cancelled)
                }),
        };

        let mut sorted: Vec<u64> = inner.durations.iter().copied().collect();
        sorted.sort_unstable();
        let avg_duration_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        let finished = win_success + win_failure;
        let hours = timeframe.window().num_minutes() as f64 / 60.0;
        let completed_total = inner.success + inner.failure;

        let mut top_errors: Vec<(String, u64)> = inner
            .per_error
            .iter()
            .map(|(code, count)| ((*code).to_string(), *count))
            .collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1));
        top_errors.truncate(5);

        let mut top_projects: Vec<(Uuid, u64)> = inner
            .per_project
            .iter()
            .map(|(id, count)| (*id, *count))
            .collect();
        top_projects.sort_by(|a, b| b.1.cmp(&a.1));
        top_projects.truncate(5);

        DashboardSnapshot {
            timeframe,
            started: inner.started,
            success: win_success,
            failure: win_failure,
            cancelled: win_cancelled,
            timeouts: inner.timeouts,
            success_rate: if finished == 0 {
                1.0
            } else {
                win_success as f64 / finished as f64
            },
            active: inner.active,
            queue_depth: inner.queue_depth,
            avg_duration_ms,
            p50_duration_ms: percentile(&sorted, 0.50),
            p95_duration_ms: percentile(&sorted, 0.95),
            p99_duration_ms: percentile(&sorted, 0.99),
            throughput_per_hour: finished as f64 / hours,
            avg_completeness: if inner.completeness_count == 0 {
                0.0
            } else {
                inner.completeness_total / inner.completeness_count as f64
            },
            total_cost_usd: inner.total_cost,
            avg_cost_per_report_usd: if completed_total == 0 {
                0.0
            } else {
                inner.total_cost / completed_total as f64
            },
            top_errors,
            top_projects,
        }
    }

    pub fn get_analytics(&self, timeframe: Timeframe) -> AnalyticsReport {
        let inner = self.inner.lock();
        let cutoff = Utc::now() - timeframe.window();

        let view = |stats: &BucketStats, key: String| {
            let total = stats.success + stats.failure + stats.cancelled;
            BucketView {
                key,
                success: stats.success,
                failure: stats.failure,
                cancelled: stats.cancelled,
                avg_duration_ms: if total == 0 {
                    0.0
                } else {
                    stats.duration_total_ms as f64 / total as f64
                },
                avg_completeness: if stats.completeness_count == 0 {
                    0.0
                } else {
                    stats.completeness_total / stats.completeness_count as f64
                },
                cost_usd: stats.cost,
            }
        };

        let buckets = match timeframe {
            Timeframe::Hourly | Timeframe::Daily => inner
                .hourly
                .range(truncate_hour(cutoff)..)
                .map(|(at, stats)| view(stats, at.format("%Y-%m-%dT%H:00Z").to_string()))
                .collect(),
            Timeframe::Weekly | Timeframe::Monthly => inner
                .daily
                .range(cutoff.date_naive()..)
                .map(|(at, stats)| view(stats, at.format("%Y-%m-%d").to_string()))
                .collect(),
        };

        AnalyticsReport { timeframe, buckets }
    }

    /// Flat JSON export for external scrapers.
    pub fn export_wire_format(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        json!({
            "reports_started_total": inner.started,
            "reports_success_total": inner.success,
            "reports_failure_total": inner.failure,
            "reports_cancelled_total": inner.cancelled,
            "reports_timeout_total": inner.timeouts,
            "reports_active": inner.active,
            "queue_depth": inner.queue_depth,
            "errors_by_kind": inner.per_error.clone(),
            "reports_by_project": inner
                .per_project
                .iter()
                .map(|(id, count)| (id.to_string(), *count))
                .collect::<HashMap<String, u64>>(),
            "cost_usd_total": inner.total_cost,
            "input_tokens_total": inner.total_input_tokens,
            "output_tokens_total": inner.total_output_tokens,
            "schedule_runs_success_total": inner.schedule_success,
            "schedule_runs_failure_total": inner.schedule_failure,
            "schedule_degraded_alerts_total": inner.degraded_alerts,
            "zombie_reports_detected_total": inner.zombie_reports,
        })
    }
}

fn truncate_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
