//! Durable-ish report task queue.
//!
//! Priority-ordered (high=1, normal=2, low=3) with per-task delay, bounded
//! attempts, and stable task ids derived from `{project_id, task_type}` —
//! duplicate ids inside the dedup window collapse to one task
//! (at-least-once overall; idempotent keys make replays safe). Pending
//! tasks snapshot to JSONL under the state dir and reload on boot; events
//! fan out over a broadcast channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use vg_domain::config::QueueConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    GenerateReport,
}

impl TaskType {
    pub fn code(self) -> &'static str {
        match self {
            Self::GenerateReport => "generate_report",
        }
    }
}

/// Stable task id: first 16 hex chars of SHA-256 over project + task type.
pub fn task_id(project_id: Uuid, task_type: TaskType) -> String {
    let digest = Sha256::digest(format!("{project_id}:{}", task_type.code()).as_bytes());
    hex::encode(&digest[..8])
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportTask {
    pub id: String,
    pub project_id: Uuid,
    pub task_type: TaskType,
    pub priority: Priority,
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    /// True when this task came from the coordinator's fallback path.
    pub fallback: bool,
    pub original_timeout_ms: Option<u64>,
    pub template_id: Option<String>,
    pub correlation_id: Uuid,
}

#[derive(Clone, Debug, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub delay: Duration,
    pub fallback: bool,
    pub original_timeout_ms: Option<u64>,
    pub template_id: Option<String>,
    pub correlation_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EnqueueReceipt {
    pub task_id: String,
    /// 1-based position among pending tasks.
    pub position: usize,
    pub estimated_completion: DateTime<Utc>,
    /// True when an equivalent pending task absorbed this enqueue.
    pub deduplicated: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    TaskEnqueued {
        task_id: String,
        project_id: Uuid,
        position: usize,
    },
    TaskStarted {
        task_id: String,
        project_id: Uuid,
        attempt: u32,
    },
    TaskCompleted {
        task_id: String,
        project_id: Uuid,
        report_id: Uuid,
    },
    TaskFailed {
        task_id: String,
        project_id: Uuid,
        error: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct QueueInner {
    pending: Vec<ReportTask>,
    /// Recently seen task ids → when, for window dedup.
    seen: HashMap<String, DateTime<Utc>>,
    dirty: bool,
}

pub struct TaskQueue {
    cfg: QueueConfig,
    /// T_queue — per-position ETA estimate (coordinator config).
    slot_estimate: Duration,
    inner: Mutex<QueueInner>,
    notify: Notify,
    events: broadcast::Sender<QueueEvent>,
    persist_path: Option<PathBuf>,
}

impl TaskQueue {
    pub fn new(cfg: QueueConfig, slot_estimate: Duration) -> Self {
        let persist_path = if cfg.state_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&cfg.state_path).join("queue-pending.jsonl"))
        };
        let (events, _) = broadcast::channel(128);
        let queue = Self {
            cfg,
            slot_estimate,
            inner: Mutex::new(QueueInner {
                pending: Vec::new(),
                seen: HashMap::new(),
                dirty: false,
            }),
            notify: Notify::new(),
            events,
            persist_path,
        };
        queue.load();
        queue
    }

    /// In-memory only (tests).
    pub fn ephemeral(cfg: QueueConfig) -> Self {
        let mut cfg = cfg;
        cfg.state_path = String::new();
        Self::new(cfg, Duration::from_secs(120))
    }

    fn load(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let Ok(data) = std::fs::read_to_string(path) else {
            return;
        };
        let mut inner = self.inner.lock();
        for line in data.lines() {
            match serde_json::from_str::<ReportTask>(line) {
                Ok(task) => inner.pending.push(task),
                Err(err) => tracing::warn!(error = %err, "skipping undecodable queued task"),
            }
        }
        if !inner.pending.is_empty() {
            tracing::info!(count = inner.pending.len(), "reloaded pending queue tasks");
            self.notify.notify_waiters();
        }
    }

    /// Snapshot pending tasks to disk when something changed.
    pub fn flush_if_dirty(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let lines = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return;
            }
            inner.dirty = false;
            inner
                .pending
                .iter()
                .filter_map(|t| serde_json::to_string(t).ok())
                .collect::<Vec<_>>()
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(err) = std::fs::write(path, lines.join("\n")) {
            tracing::warn!(error = %err, path = %path.display(), "queue snapshot failed");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// ETA for a queue position: `position × T_queue`.
    pub fn estimated_completion(&self, position: usize) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::milliseconds(
                (position as u64 * self.slot_estimate.as_millis() as u64) as i64,
            )
    }

    /// Enqueue a report task. A pending task with the same id inside the
    /// dedup window absorbs the call.
    pub fn enqueue(&self, project_id: Uuid, opts: EnqueueOptions) -> EnqueueReceipt {
        let id = task_id(project_id, TaskType::GenerateReport);
        let now = Utc::now();

        let mut inner = self.inner.lock();
        let window = chrono::Duration::milliseconds(self.cfg.dedup_window_ms as i64);
        let recently_seen = inner
            .seen
            .get(&id)
            .is_some_and(|at| now - *at <= window);
        if recently_seen {
            if let Some(position) = self.position_of_locked(&inner, &id) {
                tracing::debug!(task_id = %id, "duplicate task absorbed by dedup window");
                return EnqueueReceipt {
                    task_id: id,
                    position,
                    estimated_completion: self.estimate_locked(position),
                    deduplicated: true,
                };
            }
        }

        let task = ReportTask {
            id: id.clone(),
            project_id,
            task_type: TaskType::GenerateReport,
            priority: opts.priority,
            attempt: 0,
            max_attempts: self.cfg.max_attempts,
            enqueued_at: now,
            not_before: now
                + chrono::Duration::milliseconds(opts.delay.as_millis() as i64),
            fallback: opts.fallback,
            original_timeout_ms: opts.original_timeout_ms,
            template_id: opts.template_id,
            correlation_id: opts.correlation_id.unwrap_or_else(Uuid::new_v4),
        };
        inner.seen.insert(id.clone(), now);
        inner.seen.retain(|_, at| now - *at <= window);
        inner.pending.push(task);
        inner.dirty = true;
        let position = self
            .position_of_locked(&inner, &id)
            .unwrap_or(inner.pending.len());
        drop(inner);

        self.notify.notify_waiters();
        self.emit(QueueEvent::TaskEnqueued {
            task_id: id.clone(),
            project_id,
            position,
        });
        EnqueueReceipt {
            task_id: id,
            position,
            estimated_completion: self.estimate_locked(position),
            deduplicated: false,
        }
    }

    /// Put a task back for a retry after `delay`.
    pub fn requeue(&self, mut task: ReportTask, delay: Duration) {
        task.not_before = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        let mut inner = self.inner.lock();
        inner.seen.insert(task.id.clone(), Utc::now());
        inner.pending.push(task);
        inner.dirty = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Wait for the next ready task (priority rank, then readiness time,
    /// then enqueue time).
    pub async fn next_task(&self) -> ReportTask {
        loop {
            let (ready, sleep_for) = {
                let mut inner = self.inner.lock();
                let now = Utc::now();
                let best = inner
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.not_before <= now)
                    .min_by_key(|(_, t)| (t.priority.rank(), t.not_before, t.enqueued_at))
                    .map(|(idx, _)| idx);
                match best {
                    Some(idx) => {
                        inner.dirty = true;
                        (Some(inner.pending.remove(idx)), None)
                    }
                    None => {
                        let soonest = inner
                            .pending
                            .iter()
                            .map(|t| t.not_before)
                            .min()
                            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));
                        (None, soonest)
                    }
                }
            };
            if let Some(task) = ready {
                return task;
            }
            match sleep_for {
                Some(wait) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(wait.max(Duration::from_millis(5))) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn position_of_locked(&self, inner: &QueueInner, id: &str) -> Option<usize> {
        let target = inner.pending.iter().find(|t| t.id == id)?;
        let key = (target.priority.rank(), target.not_before, target.enqueued_at);
        let ahead = inner
            .pending
            .iter()
            .filter(|t| (t.priority.rank(), t.not_before, t.enqueued_at) < key)
            .count();
        Some(ahead + 1)
    }

    fn estimate_locked(&self, position: usize) -> DateTime<Utc> {
        self.estimated_completion(position)
    }
}
