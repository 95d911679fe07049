//! Configuration — nested sections with serde defaults, environment
//! overrides, validation, and the deterministic rollout gate.
//!
//! Durations in env vars accept `"45"` (seconds), `"45s"`, `"1500ms"`,
//! `"5m"`, or `"1h"`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Origins allowed for CORS. `["*"]` is permissive (not recommended).
    #[serde(default = "d_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors_allowed_origins: d_cors_origins(),
            max_concurrent_requests: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scraper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Per-capture deadline (SNAPSHOT_CAPTURE_TIMEOUT).
    #[serde(default = "d_30000")]
    pub capture_timeout_ms: u64,
    /// Retry attempts for transient capture failures (MAX_RETRY_ATTEMPTS).
    #[serde(default = "d_3u32")]
    pub max_retry_attempts: u32,
    /// Exponential backoff base (RETRY_BACKOFF_BASE).
    #[serde(default = "d_1000")]
    pub retry_backoff_base_ms: u64,
    #[serde(default = "d_10000")]
    pub retry_backoff_cap_ms: u64,
    /// Resource types the page-fetcher collaborator is told to skip.
    #[serde(default = "d_blocked_resources")]
    pub blocked_resource_types: Vec<String>,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
    /// Hard response-size cap in bytes.
    #[serde(default = "d_max_body")]
    pub max_body_bytes: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 30_000,
            max_retry_attempts: 3,
            retry_backoff_base_ms: 1_000,
            retry_backoff_cap_ms: 10_000,
            blocked_resource_types: d_blocked_resources(),
            user_agent: d_user_agent(),
            max_body_bytes: d_max_body(),
        }
    }
}

impl ScraperConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_cap_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Governor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// MAX_CONCURRENT_SNAPSHOTS_PER_PROJECT.
    #[serde(default = "d_5")]
    pub max_concurrent_per_project: usize,
    /// MAX_CONCURRENT_SNAPSHOTS_GLOBAL.
    #[serde(default = "d_20")]
    pub max_concurrent_global: usize,
    /// DOMAIN_THROTTLE_INTERVAL — spacing between same-host captures.
    #[serde(default = "d_10000")]
    pub domain_throttle_ms: u64,
    /// DAILY_SNAPSHOT_LIMIT.
    #[serde(default = "d_1000u64")]
    pub daily_snapshot_limit: u64,
    /// HOURLY_SNAPSHOT_LIMIT.
    #[serde(default = "d_100u64")]
    pub hourly_snapshot_limit: u64,
    /// CIRCUIT_BREAKER_ERROR_THRESHOLD.
    #[serde(default = "d_half")]
    pub breaker_error_threshold: f64,
    /// CIRCUIT_BREAKER_TIME_WINDOW.
    #[serde(default = "d_300000")]
    pub breaker_window_ms: u64,
    /// Minimum samples in the window before the breaker may open.
    #[serde(default = "d_5")]
    pub breaker_min_samples: usize,
    /// Bounded wait for a lease before callers see `congested`.
    #[serde(default = "d_60000")]
    pub acquire_wait_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_project: 5,
            max_concurrent_global: 20,
            domain_throttle_ms: 10_000,
            daily_snapshot_limit: 1_000,
            hourly_snapshot_limit: 100,
            breaker_error_threshold: 0.5,
            breaker_window_ms: 300_000,
            breaker_min_samples: 5,
            acquire_wait_ms: 60_000,
        }
    }
}

impl GovernorConfig {
    pub fn domain_throttle(&self) -> Duration {
        Duration::from_millis(self.domain_throttle_ms)
    }

    pub fn breaker_window(&self) -> Duration {
        Duration::from_millis(self.breaker_window_ms)
    }

    pub fn acquire_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_wait_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// ANALYSIS_TIMEOUT — LLM call deadline.
    #[serde(default = "d_45000")]
    pub analysis_timeout_ms: u64,
    /// TOTAL_GENERATION_TIMEOUT — full pipeline deadline.
    #[serde(default = "d_60000")]
    pub total_generation_timeout_ms: u64,
    /// Reserve subtracted from the coordinator deadline before it reaches
    /// the pipeline.
    #[serde(default = "d_5000")]
    pub deadline_reserve_ms: u64,
    /// Freshness window F.
    #[serde(default = "d_24")]
    pub freshness_window_hours: i64,
    /// Snapshots older than this are "stale" for the validator.
    #[serde(default = "d_7")]
    pub stale_after_days: i64,
    /// Minimum valid HTML/text length in bytes.
    #[serde(default = "d_100u64")]
    pub min_content_bytes: u64,
    /// Completeness floor for a full (non-partial) report.
    #[serde(default = "d_70")]
    pub min_completeness_for_full: f64,
    /// MIN_DATA_COMPLETENESS_SCORE — below this, the run is flagged degraded.
    #[serde(default = "d_40")]
    pub min_data_completeness_score: f64,
    /// FALLBACK_TO_PARTIAL_DATA_THRESHOLD — below this, skip the LLM call
    /// entirely and compose from the placeholder analysis.
    #[serde(default = "d_30f")]
    pub partial_data_threshold: f64,
    /// Whether the collector may fall back to an older valid snapshot.
    #[serde(default = "d_true")]
    pub accept_stale_snapshots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 45_000,
            total_generation_timeout_ms: 60_000,
            deadline_reserve_ms: 5_000,
            freshness_window_hours: 24,
            stale_after_days: 7,
            min_content_bytes: 100,
            min_completeness_for_full: 70.0,
            min_data_completeness_score: 40.0,
            partial_data_threshold: 30.0,
            accept_stale_snapshots: true,
        }
    }
}

impl PipelineConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn total_generation_timeout(&self) -> Duration {
        Duration::from_millis(self.total_generation_timeout_ms)
    }

    pub fn deadline_reserve(&self) -> Duration {
        Duration::from_millis(self.deadline_reserve_ms)
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.freshness_window_hours)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "d_5")]
    pub max_concurrent_processing: usize,
    /// T_immediate.
    #[serde(default = "d_45000")]
    pub immediate_timeout_ms: u64,
    /// When saturated, degrade to the queue instead of rejecting.
    #[serde(default = "d_true")]
    pub graceful_degradation: bool,
    /// Default for requests that don't specify `fallback_to_queue`.
    #[serde(default = "d_true")]
    pub fallback_to_queue: bool,
    /// T_queue — per-position ETA estimate.
    #[serde(default = "d_120000")]
    pub queue_slot_estimate_ms: u64,
    /// Delay applied when a task is enqueued by the fallback path.
    #[serde(default = "d_1000")]
    pub fallback_enqueue_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processing: 5,
            immediate_timeout_ms: 45_000,
            graceful_degradation: true,
            fallback_to_queue: true,
            queue_slot_estimate_ms: 120_000,
            fallback_enqueue_delay_ms: 1_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn immediate_timeout(&self) -> Duration {
        Duration::from_millis(self.immediate_timeout_ms)
    }

    pub fn queue_slot_estimate(&self) -> Duration {
        Duration::from_millis(self.queue_slot_estimate_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "d_2")]
    pub workers: usize,
    #[serde(default = "d_3u32")]
    pub max_attempts: u32,
    #[serde(default = "d_2000")]
    pub retry_backoff_ms: u64,
    /// Deadline for a queued pipeline run (longer than the immediate path).
    #[serde(default = "d_300000")]
    pub worker_timeout_ms: u64,
    /// Duplicate task ids within this window collapse to one task.
    #[serde(default = "d_60000")]
    pub dedup_window_ms: u64,
    /// Directory for the pending-task JSONL snapshot.
    #[serde(default = "d_state_path")]
    pub state_path: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            retry_backoff_ms: 2_000,
            worker_timeout_ms: 300_000,
            dedup_window_ms: 60_000,
            state_path: d_state_path(),
        }
    }
}

impl QueueConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "d_30")]
    pub tick_secs: u64,
    /// Consecutive failures before the derived status turns Degraded.
    #[serde(default = "d_5u32")]
    pub degraded_threshold: u32,
    /// Timezone cron expressions are evaluated in.
    #[serde(default = "d_utc")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            degraded_threshold: 5,
            timezone: d_utc(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM collaborator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Endpoint of the generation collaborator. `None` disables real
    /// analysis — every report uses the placeholder.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "d_model")]
    pub model: String,
    /// Env var holding the bearer key (never stored in config files).
    #[serde(default = "d_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_4096")]
    pub max_tokens: u32,
    #[serde(default = "d_temp")]
    pub temperature: f32,
    #[serde(default = "d_3u32")]
    pub max_retries: u32,
    #[serde(default = "d_1000")]
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: d_model(),
            api_key_env: d_key_env(),
            max_tokens: 4096,
            temperature: 0.2,
            max_retries: 3,
            retry_backoff_ms: 1_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache / features / metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// CACHE_TTL for resolution entries.
    #[serde(default = "d_3600")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3_600 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// ENABLE_FRESH_SNAPSHOT_REQUIREMENT — refuse stale snapshot fallbacks.
    #[serde(default)]
    pub fresh_snapshot_requirement: bool,
    /// ENABLE_REAL_TIME_UPDATES — publish status events.
    #[serde(default = "d_true")]
    pub real_time_updates: bool,
    /// ENABLE_INTELLIGENT_CACHING — use the resolution cache.
    #[serde(default = "d_true")]
    pub intelligent_caching: bool,
    /// Rollout percentage for comparative reports (0–100).
    #[serde(default = "d_100u8")]
    pub comparative_rollout_percentage: u8,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fresh_snapshot_requirement: false,
            real_time_updates: true,
            intelligent_caching: true,
            comparative_rollout_percentage: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Hourly buckets kept this many hours.
    #[serde(default = "d_48")]
    pub retention_hours: i64,
    /// Daily buckets kept this many days.
    #[serde(default = "d_30i64")]
    pub retention_days: i64,
    #[serde(default = "d_1024")]
    pub duration_reservoir_size: usize,
    #[serde(default = "d_cost_in")]
    pub cost_per_1k_input_tokens: f64,
    #[serde(default = "d_cost_out")]
    pub cost_per_1k_output_tokens: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_hours: 48,
            retention_days: 30,
            duration_reservoir_size: 1_024,
            cost_per_1k_input_tokens: d_cost_in(),
            cost_per_1k_output_tokens: d_cost_out(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading, env overrides, validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a duration string: bare integers are seconds; `ms`, `s`, `m`, `h`
/// suffixes are recognized. Returns milliseconds.
pub fn parse_duration_ms(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(n),
        "s" | "sec" | "secs" => n.checked_mul(1_000),
        "m" | "min" => n.checked_mul(60_000),
        "h" => n.checked_mul(3_600_000),
        _ => None,
    }
}

impl Config {
    /// Apply environment overrides using an explicit lookup function
    /// (injected so tests never touch the process environment).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let dur = |name: &str, slot: &mut u64| {
            if let Some(v) = lookup(name) {
                match parse_duration_ms(&v) {
                    Some(ms) => *slot = ms,
                    None => tracing::warn!(name, value = %v, "unparseable duration, ignoring"),
                }
            }
        };
        dur("SNAPSHOT_CAPTURE_TIMEOUT", &mut self.scraper.capture_timeout_ms);
        dur("ANALYSIS_TIMEOUT", &mut self.pipeline.analysis_timeout_ms);
        dur(
            "TOTAL_GENERATION_TIMEOUT",
            &mut self.pipeline.total_generation_timeout_ms,
        );
        dur("DOMAIN_THROTTLE_INTERVAL", &mut self.governor.domain_throttle_ms);
        dur("CIRCUIT_BREAKER_TIME_WINDOW", &mut self.governor.breaker_window_ms);
        dur("RETRY_BACKOFF_BASE", &mut self.scraper.retry_backoff_base_ms);
        if let Some(v) = lookup("CACHE_TTL") {
            if let Some(ms) = parse_duration_ms(&v) {
                self.cache.ttl_secs = ms / 1_000;
            }
        }

        fn num<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            slot: &mut T,
        ) {
            if let Some(v) = lookup(name) {
                match v.trim().parse() {
                    Ok(parsed) => *slot = parsed,
                    Err(_) => tracing::warn!(name, value = %v, "unparseable value, ignoring"),
                }
            }
        }
        num(
            &lookup,
            "MAX_CONCURRENT_SNAPSHOTS_PER_PROJECT",
            &mut self.governor.max_concurrent_per_project,
        );
        num(
            &lookup,
            "MAX_CONCURRENT_SNAPSHOTS_GLOBAL",
            &mut self.governor.max_concurrent_global,
        );
        num(&lookup, "DAILY_SNAPSHOT_LIMIT", &mut self.governor.daily_snapshot_limit);
        num(&lookup, "HOURLY_SNAPSHOT_LIMIT", &mut self.governor.hourly_snapshot_limit);
        num(
            &lookup,
            "CIRCUIT_BREAKER_ERROR_THRESHOLD",
            &mut self.governor.breaker_error_threshold,
        );
        num(&lookup, "MAX_RETRY_ATTEMPTS", &mut self.scraper.max_retry_attempts);
        num(
            &lookup,
            "MIN_DATA_COMPLETENESS_SCORE",
            &mut self.pipeline.min_data_completeness_score,
        );
        num(
            &lookup,
            "FALLBACK_TO_PARTIAL_DATA_THRESHOLD",
            &mut self.pipeline.partial_data_threshold,
        );
        num(
            &lookup,
            "COMPARATIVE_REPORT_ROLLOUT_PERCENTAGE",
            &mut self.features.comparative_rollout_percentage,
        );

        let flag = |name: &str, slot: &mut bool| {
            if let Some(v) = lookup(name) {
                *slot = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            }
        };
        flag(
            "ENABLE_FRESH_SNAPSHOT_REQUIREMENT",
            &mut self.features.fresh_snapshot_requirement,
        );
        flag("ENABLE_REAL_TIME_UPDATES", &mut self.features.real_time_updates);
        flag(
            "ENABLE_INTELLIGENT_CACHING",
            &mut self.features.intelligent_caching,
        );
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Sanity-check the assembled configuration.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        fn err(issues: &mut Vec<ConfigIssue>, message: String) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message,
            });
        }

        if self.governor.max_concurrent_per_project == 0 {
            err(&mut issues, "governor.max_concurrent_per_project must be > 0".into());
        }
        if self.governor.max_concurrent_global < self.governor.max_concurrent_per_project {
            err(&mut issues, format!(
                "governor.max_concurrent_global ({}) below the per-project cap ({})",
                self.governor.max_concurrent_global, self.governor.max_concurrent_per_project
            ));
        }
        if !(0.0..=1.0).contains(&self.governor.breaker_error_threshold) {
            err(&mut issues, format!(
                "governor.breaker_error_threshold must be in [0,1], got {}",
                self.governor.breaker_error_threshold
            ));
        }
        if self.features.comparative_rollout_percentage > 100 {
            err(&mut issues, format!(
                "features.comparative_rollout_percentage must be 0-100, got {}",
                self.features.comparative_rollout_percentage
            ));
        }
        if self.coordinator.max_concurrent_processing == 0 {
            err(&mut issues, "coordinator.max_concurrent_processing must be > 0".into());
        }
        if self.queue.workers == 0 {
            err(&mut issues, "queue.workers must be > 0".into());
        }
        if self.pipeline.partial_data_threshold > self.pipeline.min_completeness_for_full {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "pipeline.partial_data_threshold ({}) above min_completeness_for_full ({})",
                    self.pipeline.partial_data_threshold, self.pipeline.min_completeness_for_full
                ),
            });
        }
        if self.coordinator.immediate_timeout_ms <= self.pipeline.deadline_reserve_ms {
            err(&mut issues, format!(
                "coordinator.immediate_timeout_ms ({}) must exceed the deadline reserve ({})",
                self.coordinator.immediate_timeout_ms, self.pipeline.deadline_reserve_ms
            ));
        }
        if self.llm.endpoint.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "llm.endpoint unset — every analysis will use the placeholder".into(),
            });
        }
        issues
    }

    /// Deterministic, project-stable rollout gate for comparative reports.
    pub fn should_use_comparative_reports(&self, project_id: Uuid) -> bool {
        let pct = self.features.comparative_rollout_percentage.min(100);
        if pct == 0 {
            return false;
        }
        if pct >= 100 {
            return true;
        }
        rollout_bucket(project_id) < u64::from(pct)
    }

    pub fn to_toml_string(&self) -> Option<String> {
        toml::to_string_pretty(self).ok()
    }
}

/// Stable 0–99 bucket from a SHA-256 of the project id.
pub fn rollout_bucket(project_id: Uuid) -> u64 {
    let digest = Sha256::digest(project_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 100
}

// ── serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    4710
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:4710".into()]
}
fn d_user_agent() -> String {
    "Vantage/0.1 (+competitive-intel)".into()
}
fn d_blocked_resources() -> Vec<String> {
    vec!["image".into(), "font".into(), "media".into()]
}
fn d_state_path() -> String {
    "./data".into()
}
fn d_model() -> String {
    "vantage-analyst-1".into()
}
fn d_key_env() -> String {
    "VANTAGE_LLM_API_KEY".into()
}
fn d_utc() -> String {
    "UTC".into()
}
fn d_max_body() -> usize {
    5 * 1024 * 1024
}
fn d_cost_in() -> f64 {
    0.003
}
fn d_cost_out() -> f64 {
    0.015
}
fn d_2() -> usize {
    2
}
fn d_5() -> usize {
    5
}
fn d_20() -> usize {
    20
}
fn d_256() -> usize {
    256
}
fn d_1024() -> usize {
    1_024
}
fn d_3u32() -> u32 {
    3
}
fn d_5u32() -> u32 {
    5
}
fn d_7() -> i64 {
    7
}
fn d_24() -> i64 {
    24
}
fn d_48() -> i64 {
    48
}
fn d_30i64() -> i64 {
    30
}
fn d_30() -> u64 {
    30
}
fn d_100u64() -> u64 {
    100
}
fn d_1000u64() -> u64 {
    1_000
}
fn d_100u8() -> u8 {
    100
}
fn d_1000() -> u64 {
    1_000
}
fn d_2000() -> u64 {
    2_000
}
fn d_3600() -> u64 {
    3_600
}
fn d_4096() -> u32 {
    4_096
}
fn d_5000() -> u64 {
    5_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_45000() -> u64 {
    45_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_120000() -> u64 {
    120_000
}
fn d_300000() -> u64 {
    300_000
}
fn d_temp() -> f32 {
    0.2
}
fn d_half() -> f64 {
    0.5
}
fn d_30f() -> f64 {
    30.0
}
fn d_40() -> f64 {
    40.0
}
fn d_70() -> f64 {
    70.0
}
fn d_true() -> bool {
    true
}
