//! Async report coordinator.
//!
//! Two-path strategy with one deterministic outcome shape: an admission-
//! gated immediate path raced against `T_immediate`, and a queue path used
//! on saturation (graceful degradation) or as fallback after a timeout or
//! failure. Queue workers rerun the same pipeline with a longer deadline
//! and bounded retries.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use vg_domain::config::Config;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::CancelToken;
use vg_engine::pipeline::{GenerateOptions, PhaseSink, PipelinePhase, ReportPipeline};

use crate::metrics::{MetricsCollector, RunOutcome};
use crate::queue::{EnqueueOptions, Priority, QueueEvent, ReportTask, TaskQueue};
use crate::status::{ReportPhase, ReportRunStatus, StatusEvent, StatusPublisher};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Immediate,
    Queued,
    Fallback,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct AsyncResult {
    pub success: bool,
    pub processing_method: ProcessingMethod,
    pub report_id: Option<Uuid>,
    pub task_id: Option<String>,
    pub processing_time_ms: u64,
    pub timeout_exceeded: bool,
    pub fallback_used: bool,
    pub queue_scheduled: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_queue_completion: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AsyncResult {
    fn base(method: ProcessingMethod, started: Instant) -> Self {
        Self {
            success: false,
            processing_method: method,
            report_id: None,
            task_id: None,
            processing_time_ms: started.elapsed().as_millis() as u64,
            timeout_exceeded: false,
            fallback_used: false,
            queue_scheduled: false,
            retry_count: 0,
            estimated_queue_completion: None,
            error: None,
        }
    }
}

/// Per-request knobs (spec §6 request options). Unset fields fall back to
/// coordinator config.
#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    pub timeout: Option<Duration>,
    pub priority: Option<Priority>,
    pub fallback_to_queue: Option<bool>,
    pub notify_on_completion: bool,
    pub template: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission guards
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SlotGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ProjectGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    project_id: Uuid,
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.project_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReportCoordinator {
    config: Arc<Config>,
    pipeline: Arc<ReportPipeline>,
    queue: Arc<TaskQueue>,
    status: Arc<StatusPublisher>,
    metrics: Arc<MetricsCollector>,
    active: Arc<AtomicUsize>,
    in_flight_projects: Arc<Mutex<HashSet<Uuid>>>,
}

impl ReportCoordinator {
    pub fn new(
        config: Arc<Config>,
        pipeline: Arc<ReportPipeline>,
        queue: Arc<TaskQueue>,
        status: Arc<StatusPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            pipeline,
            queue,
            status,
            metrics,
            active: Arc::new(AtomicUsize::new(0)),
            in_flight_projects: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Entry point: generate a report for a project, immediately when a
    /// slot is free, otherwise through the queue.
    pub async fn process_initial_report(
        &self,
        project_id: Uuid,
        opts: &ReportOptions,
    ) -> AsyncResult {
        let started = Instant::now();
        let correlation_id = Uuid::new_v4();

        if !self.config.should_use_comparative_reports(project_id) {
            let message = "comparative reports are not enabled for this project";
            self.status.publish(
                StatusEvent::new(
                    project_id,
                    ReportRunStatus::Failed,
                    ReportPhase::Validation,
                    0,
                    message,
                )
                .with_error(message),
            );
            let mut result = AsyncResult::base(ProcessingMethod::Failed, started);
            result.error = Some(format!("{}: {message}", ErrorKind::Validation.code()));
            return result;
        }

        let fallback_to_queue = opts
            .fallback_to_queue
            .unwrap_or(self.config.coordinator.fallback_to_queue);
        let immediate_timeout = opts
            .timeout
            .unwrap_or_else(|| self.config.coordinator.immediate_timeout());
        let priority = opts.priority.unwrap_or_default();

        // ── Admission ────────────────────────────────────────────────
        let Some((slot, project_guard)) = self.try_admit(project_id) else {
            if self.config.coordinator.graceful_degradation && fallback_to_queue {
                tracing::info!(
                    correlation_id = %correlation_id,
                    project_id = %project_id,
                    active = self.active_count(),
                    "saturated, degrading to queue"
                );
                return self.queue_handoff(
                    project_id,
                    priority,
                    ProcessingMethod::Queued,
                    immediate_timeout,
                    opts,
                    correlation_id,
                    started,
                    false,
                );
            }
            let mut result = AsyncResult::base(ProcessingMethod::Failed, started);
            result.error = Some(format!(
                "{}: all {} processing slots busy",
                ErrorKind::Congested.code(),
                self.config.coordinator.max_concurrent_processing
            ));
            return result;
        };

        // ── Immediate path ───────────────────────────────────────────
        self.status.publish(StatusEvent::new(
            project_id,
            ReportRunStatus::Generating,
            ReportPhase::Validation,
            0,
            "admitted for immediate processing",
        ));
        let ctx = self.metrics.record_start(project_id);
        let cancel = CancelToken::new();
        let budget = immediate_timeout
            .saturating_sub(self.config.pipeline.deadline_reserve())
            .max(Duration::from_millis(1));
        let gen_opts = GenerateOptions {
            product_id: None,
            template_id: opts.template.clone(),
            budget,
            correlation_id,
        };
        let sink = self.phase_sink(project_id);

        let run = tokio::time::timeout(
            immediate_timeout,
            self.pipeline
                .generate(project_id, &gen_opts, &cancel, &sink),
        )
        .await;
        drop(slot);
        drop(project_guard);

        match run {
            Ok(Ok(outcome)) => {
                self.metrics.record_complete(
                    &ctx,
                    &RunOutcome {
                        success: true,
                        completeness_score: Some(outcome.completeness_score),
                        input_tokens: outcome.input_tokens,
                        output_tokens: outcome.output_tokens,
                        ..RunOutcome::default()
                    },
                );
                let mut result = AsyncResult::base(ProcessingMethod::Immediate, started);
                result.success = true;
                result.report_id = Some(outcome.report_id);
                result
            }
            Ok(Err(err)) => {
                cancel.cancel();
                self.metrics.record_complete(
                    &ctx,
                    &RunOutcome {
                        cancelled: err.kind == ErrorKind::Cancelled,
                        error_kind: Some(err.kind),
                        ..RunOutcome::default()
                    },
                );
                self.after_immediate_miss(
                    project_id,
                    priority,
                    immediate_timeout,
                    opts,
                    correlation_id,
                    started,
                    fallback_to_queue,
                    false,
                    Some(err),
                )
            }
            Err(_elapsed) => {
                cancel.cancel();
                self.metrics.record_complete(
                    &ctx,
                    &RunOutcome {
                        timed_out: true,
                        error_kind: Some(ErrorKind::Timeout),
                        ..RunOutcome::default()
                    },
                );
                self.after_immediate_miss(
                    project_id,
                    priority,
                    immediate_timeout,
                    opts,
                    correlation_id,
                    started,
                    fallback_to_queue,
                    true,
                    None,
                )
            }
        }
    }

    fn try_admit(&self, project_id: Uuid) -> Option<(SlotGuard, ProjectGuard)> {
        let max = self.config.coordinator.max_concurrent_processing;
        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        if previous >= max {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        let slot = SlotGuard {
            counter: self.active.clone(),
        };
        if !self.in_flight_projects.lock().insert(project_id) {
            // Same project already running an immediate pipeline.
            return None; // slot guard drop releases the counter
        }
        let project_guard = ProjectGuard {
            set: self.in_flight_projects.clone(),
            project_id,
        };
        Some((slot, project_guard))
    }

    #[allow(clippy::too_many_arguments)]
    fn after_immediate_miss(
        &self,
        project_id: Uuid,
        priority: Priority,
        immediate_timeout: Duration,
        opts: &ReportOptions,
        correlation_id: Uuid,
        started: Instant,
        fallback_to_queue: bool,
        timed_out: bool,
        err: Option<Error>,
    ) -> AsyncResult {
        let reason = match (&err, timed_out) {
            (_, true) => format!("immediate path exceeded {immediate_timeout:?}"),
            (Some(e), _) => e.to_string(),
            (None, false) => "immediate path failed".to_string(),
        };
        tracing::warn!(
            correlation_id = %correlation_id,
            project_id = %project_id,
            timed_out,
            fallback_to_queue,
            error = %reason,
            "immediate report path missed"
        );

        if !fallback_to_queue {
            self.status.publish(
                StatusEvent::new(
                    project_id,
                    ReportRunStatus::Failed,
                    ReportPhase::ReportGeneration,
                    0,
                    "report generation failed",
                )
                .with_error(reason.clone()),
            );
            let mut result = AsyncResult::base(ProcessingMethod::Failed, started);
            result.timeout_exceeded = timed_out;
            result.error = Some(reason);
            return result;
        }

        let mut result = self.queue_handoff(
            project_id,
            Priority::High.min_rank(priority),
            ProcessingMethod::Fallback,
            immediate_timeout,
            opts,
            correlation_id,
            started,
            true,
        );
        result.timeout_exceeded = timed_out;
        result
    }

    /// Enqueue and shape the queued/fallback result.
    #[allow(clippy::too_many_arguments)]
    fn queue_handoff(
        &self,
        project_id: Uuid,
        priority: Priority,
        method: ProcessingMethod,
        original_timeout: Duration,
        opts: &ReportOptions,
        correlation_id: Uuid,
        started: Instant,
        fallback: bool,
    ) -> AsyncResult {
        let delay = if fallback {
            Duration::from_millis(self.config.coordinator.fallback_enqueue_delay_ms)
        } else {
            Duration::ZERO
        };
        let receipt = self.queue.enqueue(
            project_id,
            EnqueueOptions {
                priority,
                delay,
                fallback,
                original_timeout_ms: Some(original_timeout.as_millis() as u64),
                template_id: opts.template.clone(),
                correlation_id: Some(correlation_id),
            },
        );
        self.metrics.set_queue_depth(self.queue.depth());

        self.status.publish(
            StatusEvent::new(
                project_id,
                ReportRunStatus::Generating,
                ReportPhase::Validation,
                0,
                format!("queued for processing (position {})", receipt.position),
            )
            .with_eta(receipt.estimated_completion),
        );

        let mut result = AsyncResult::base(method, started);
        result.success = true;
        result.task_id = Some(receipt.task_id);
        result.queue_scheduled = true;
        result.fallback_used = fallback;
        result.estimated_queue_completion = Some(receipt.estimated_completion);
        result
    }

    fn phase_sink(&self, project_id: Uuid) -> PhaseSink {
        let status = self.status.clone();
        Arc::new(move |phase: PipelinePhase, message: &str, completeness: Option<f64>| {
            let run_status = if phase == PipelinePhase::Completed {
                ReportRunStatus::Completed
            } else {
                ReportRunStatus::Generating
            };
            status.publish(
                StatusEvent::new(
                    project_id,
                    run_status,
                    phase.into(),
                    phase.progress(),
                    message,
                )
                .with_completeness(completeness),
            );
        })
    }

    // ── Queue workers ────────────────────────────────────────────────

    /// Spawn the configured worker pool.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.queue.workers.max(1))
            .map(|worker_id| {
                let this = self.clone();
                tokio::spawn(async move {
                    tracing::info!(worker_id, "queue worker started");
                    loop {
                        let task = this.queue.next_task().await;
                        this.metrics.set_queue_depth(this.queue.depth());
                        this.run_queued_task(task).await;
                    }
                })
            })
            .collect()
    }

    /// Process one dequeued task: same pipeline, longer deadline, bounded
    /// retries with exponential backoff.
    pub async fn run_queued_task(&self, mut task: ReportTask) {
        task.attempt += 1;
        self.queue.emit(QueueEvent::TaskStarted {
            task_id: task.id.clone(),
            project_id: task.project_id,
            attempt: task.attempt,
        });
        self.status.publish(StatusEvent::new(
            task.project_id,
            ReportRunStatus::Generating,
            ReportPhase::Validation,
            0,
            format!("queued generation started (attempt {})", task.attempt),
        ));

        let worker_timeout = self.config.queue.worker_timeout();
        let budget = worker_timeout
            .saturating_sub(self.config.pipeline.deadline_reserve())
            .max(Duration::from_millis(1));
        let gen_opts = GenerateOptions {
            product_id: None,
            template_id: task.template_id.clone(),
            budget,
            correlation_id: task.correlation_id,
        };
        let ctx = self.metrics.record_start(task.project_id);
        let cancel = CancelToken::new();
        let sink = self.phase_sink(task.project_id);

        let run = tokio::time::timeout(
            worker_timeout,
            self.pipeline
                .generate(task.project_id, &gen_opts, &cancel, &sink),
        )
        .await;

        match run {
            Ok(Ok(outcome)) => {
                self.metrics.record_complete(
                    &ctx,
                    &RunOutcome {
                        success: true,
                        completeness_score: Some(outcome.completeness_score),
                        input_tokens: outcome.input_tokens,
                        output_tokens: outcome.output_tokens,
                        ..RunOutcome::default()
                    },
                );
                self.queue.emit(QueueEvent::TaskCompleted {
                    task_id: task.id.clone(),
                    project_id: task.project_id,
                    report_id: outcome.report_id,
                });
                tracing::info!(
                    task_id = %task.id,
                    report_id = %outcome.report_id,
                    attempt = task.attempt,
                    "queued report completed"
                );
            }
            Ok(Err(err)) => {
                cancel.cancel();
                self.metrics.record_complete(
                    &ctx,
                    &RunOutcome {
                        cancelled: err.kind == ErrorKind::Cancelled,
                        error_kind: Some(err.kind),
                        ..RunOutcome::default()
                    },
                );
                self.retry_or_fail(task, err.to_string());
            }
            Err(_elapsed) => {
                cancel.cancel();
                self.metrics.record_complete(
                    &ctx,
                    &RunOutcome {
                        timed_out: true,
                        error_kind: Some(ErrorKind::Timeout),
                        ..RunOutcome::default()
                    },
                );
                self.retry_or_fail(task, format!("worker timeout after {worker_timeout:?}"));
            }
        }
        self.metrics.set_queue_depth(self.queue.depth());
    }

    fn retry_or_fail(&self, task: ReportTask, reason: String) {
        if task.attempt < task.max_attempts {
            let backoff = self.config.queue.retry_backoff()
                * 2u32.saturating_pow(task.attempt.saturating_sub(1));
            tracing::warn!(
                task_id = %task.id,
                attempt = task.attempt,
                max_attempts = task.max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %reason,
                "queued task failed, retrying"
            );
            self.queue.requeue(task, backoff);
            return;
        }
        tracing::error!(
            task_id = %task.id,
            project_id = %task.project_id,
            attempts = task.attempt,
            error = %reason,
            "queued task exhausted retries"
        );
        self.status.publish(
            StatusEvent::new(
                task.project_id,
                ReportRunStatus::Failed,
                ReportPhase::ReportGeneration,
                0,
                "queued report generation failed",
            )
            .with_error(reason.clone()),
        );
        self.queue.emit(QueueEvent::TaskFailed {
            task_id: task.id,
            project_id: task.project_id,
            error: reason,
        });
    }
}

impl Priority {
    /// The higher-ranked (numerically smaller) of two priorities.
    fn min_rank(self, other: Priority) -> Priority {
        if self.rank() <= other.rank() {
            self
        } else {
            other
        }
    }
}
