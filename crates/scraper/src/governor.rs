//! Rate & concurrency governor.
//!
//! Enforces per-project and global concurrency caps (FIFO per project via
//! semaphore queueing), per-domain request spacing, daily/hourly capture
//! budgets with wall-clock reset, and a per-domain circuit breaker over a
//! trailing error window. Leases release on drop, covering every exit path
//! including cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, timeout_at, Duration, Instant};
use uuid::Uuid;

use vg_domain::config::GovernorConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DomainState {
    /// Next instant a request to this host may start.
    next_slot: Instant,
    /// Trailing (when, success) samples inside the breaker window.
    samples: VecDeque<(Instant, bool)>,
    /// When set, the breaker is open and captures return `blocked`.
    open_until: Option<Instant>,
}

impl DomainState {
    fn new(now: Instant) -> Self {
        Self {
            next_slot: now,
            samples: VecDeque::new(),
            open_until: None,
        }
    }
}

struct BudgetState {
    day: chrono::NaiveDate,
    daily_count: u64,
    hour: DateTime<Utc>,
    hourly_count: u64,
}

impl BudgetState {
    fn roll(&mut self, now: DateTime<Utc>) {
        let day = now.date_naive();
        if day != self.day {
            self.day = day;
            self.daily_count = 0;
        }
        let hour = truncate_to_hour(now);
        if hour != self.hour {
            self.hour = hour;
            self.hourly_count = 0;
        }
    }
}

fn truncate_to_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// RAII concurrency lease. Dropping returns both the project and the
/// global slot.
#[derive(Debug)]
pub struct Lease {
    _project: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Governor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Governor {
    cfg: GovernorConfig,
    global: Arc<Semaphore>,
    projects: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    domains: Mutex<HashMap<String, DomainState>>,
    budget: Mutex<BudgetState>,
}

impl Governor {
    pub fn new(cfg: GovernorConfig) -> Self {
        let now = Utc::now();
        Self {
            global: Arc::new(Semaphore::new(cfg.max_concurrent_global)),
            projects: Mutex::new(HashMap::new()),
            domains: Mutex::new(HashMap::new()),
            budget: Mutex::new(BudgetState {
                day: now.date_naive(),
                daily_count: 0,
                hour: truncate_to_hour(now),
                hourly_count: 0,
            }),
            cfg,
        }
    }

    fn project_semaphore(&self, project_id: Uuid) -> Arc<Semaphore> {
        let mut projects = self.projects.lock();
        projects
            .entry(project_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.cfg.max_concurrent_per_project)))
            .clone()
    }

    /// Acquire a capture lease for `project_id` against `host`.
    ///
    /// Waits FIFO behind the project's queue, bounded by the configured
    /// acquire wait; elapsing yields `congested`. An open breaker for the
    /// host yields `blocked` without waiting. The same-host spacing slot is
    /// reserved before returning, so concurrent holders stay serialized
    /// per domain.
    pub async fn acquire(&self, project_id: Uuid, host: &str) -> Result<Lease> {
        if self.domain_blocked(host) {
            return Err(Error::new(
                ErrorKind::Blocked,
                format!("circuit open for {host}"),
            ));
        }

        let deadline = Instant::now() + self.cfg.acquire_wait();
        let project_sem = self.project_semaphore(project_id);
        let project = match timeout_at(deadline, project_sem.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                return Err(Error::new(
                    ErrorKind::Congested,
                    format!("no project capture slot within {:?}", self.cfg.acquire_wait()),
                ))
            }
        };
        let global = match timeout_at(deadline, self.global.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                return Err(Error::new(
                    ErrorKind::Congested,
                    format!("no global capture slot within {:?}", self.cfg.acquire_wait()),
                ))
            }
        };

        // Reserve this host's next slot, then wait out the spacing.
        let slot = {
            let mut domains = self.domains.lock();
            let now = Instant::now();
            let state = domains
                .entry(host.to_owned())
                .or_insert_with(|| DomainState::new(now));
            let slot = state.next_slot.max(now);
            state.next_slot = slot + self.cfg.domain_throttle();
            slot
        };
        if slot > Instant::now() {
            sleep_until(slot).await;
        }

        Ok(Lease {
            _project: project,
            _global: global,
        })
    }

    /// When the next request to `host` may start (contract:
    /// `throttleDomain(host) → waitUntil`). Does not reserve the slot.
    pub fn throttle_domain(&self, host: &str) -> Instant {
        let domains = self.domains.lock();
        domains
            .get(host)
            .map(|s| s.next_slot)
            .unwrap_or_else(Instant::now)
    }

    // ── Budgets ──────────────────────────────────────────────────────

    /// Budget breach is not an error: callers queue or downgrade instead.
    pub fn budget_ok(&self, now: DateTime<Utc>) -> bool {
        let mut budget = self.budget.lock();
        budget.roll(now);
        budget.daily_count < self.cfg.daily_snapshot_limit
            && budget.hourly_count < self.cfg.hourly_snapshot_limit
    }

    /// Count one capture against both budget windows.
    pub fn record_capture(&self, now: DateTime<Utc>) {
        let mut budget = self.budget.lock();
        budget.roll(now);
        budget.daily_count += 1;
        budget.hourly_count += 1;
    }

    // ── Circuit breaker ──────────────────────────────────────────────

    /// Feed the breaker with a capture outcome for `host`.
    pub fn record_outcome(&self, host: &str, success: bool) {
        let mut domains = self.domains.lock();
        let now = Instant::now();
        let state = domains
            .entry(host.to_owned())
            .or_insert_with(|| DomainState::new(now));

        state.samples.push_back((now, success));
        let window_start = now - self.cfg.breaker_window();
        while state
            .samples
            .front()
            .is_some_and(|(at, _)| *at < window_start)
        {
            state.samples.pop_front();
        }

        if state.open_until.is_none() && state.samples.len() >= self.cfg.breaker_min_samples {
            let failures = state.samples.iter().filter(|(_, ok)| !ok).count();
            let rate = failures as f64 / state.samples.len() as f64;
            if rate > self.cfg.breaker_error_threshold {
                state.open_until = Some(now + self.cfg.breaker_window());
                tracing::warn!(
                    host,
                    error_rate = rate,
                    window_ms = self.cfg.breaker_window_ms,
                    "circuit breaker opened"
                );
            }
        }
    }

    /// True while the breaker for `host` is open. Expiry closes it and
    /// clears the sample window for a fresh start.
    pub fn domain_blocked(&self, host: &str) -> bool {
        let mut domains = self.domains.lock();
        let Some(state) = domains.get_mut(host) else {
            return false;
        };
        match state.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                state.open_until = None;
                state.samples.clear();
                tracing::info!(host, "circuit breaker closed");
                false
            }
            None => false,
        }
    }
}
