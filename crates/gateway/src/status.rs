//! Status publisher.
//!
//! Per-project fan-out of progress/phase events over broadcast channels.
//! Delivery is best-effort at-least-once per connected sink, FIFO per
//! project; lagging sinks observe a gap (and SSE bridges drop them), and
//! subscribers only see events published after they subscribed — no replay.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use vg_engine::pipeline::PipelinePhase;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportRunStatus {
    Generating,
    Completed,
    Failed,
    NotStarted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPhase {
    Validation,
    SnapshotCapture,
    DataCollection,
    Analysis,
    ReportGeneration,
    Completed,
}

impl From<PipelinePhase> for ReportPhase {
    fn from(phase: PipelinePhase) -> Self {
        match phase {
            PipelinePhase::Validation => Self::Validation,
            PipelinePhase::SnapshotCapture => Self::SnapshotCapture,
            PipelinePhase::DataCollection => Self::DataCollection,
            PipelinePhase::Analysis => Self::Analysis,
            PipelinePhase::ReportGeneration => Self::ReportGeneration,
            PipelinePhase::Completed => Self::Completed,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct CompetitorSnapshotsStatus {
    pub total: usize,
    pub with_data: usize,
    pub captured_now: usize,
    pub fallback_only: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusEvent {
    pub project_id: Uuid,
    pub status: ReportRunStatus,
    pub phase: ReportPhase,
    /// 0–100.
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitor_snapshots_status: Option<CompetitorSnapshotsStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_completeness_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusEvent {
    pub fn new(
        project_id: Uuid,
        status: ReportRunStatus,
        phase: ReportPhase,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            status,
            phase,
            progress: progress.min(100),
            message: message.into(),
            timestamp: Utc::now(),
            estimated_completion_time: None,
            competitor_snapshots_status: None,
            data_completeness_score: None,
            error: None,
        }
    }

    pub fn with_completeness(mut self, score: Option<f64>) -> Self {
        self.data_completeness_score = score;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.estimated_completion_time = Some(eta);
        self
    }
}

const CHANNEL_CAPACITY: usize = 256;

pub struct StatusPublisher {
    /// ENABLE_REAL_TIME_UPDATES gate; publishing is a no-op when off.
    enabled: bool,
    channels: RwLock<HashMap<Uuid, broadcast::Sender<StatusEvent>>>,
}

impl StatusPublisher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a project's event stream. Only events published after
    /// this call are delivered.
    pub fn subscribe(&self, project_id: Uuid) -> broadcast::Receiver<StatusEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(project_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to every connected sink for its project.
    pub fn publish(&self, event: StatusEvent) {
        if !self.enabled {
            return;
        }
        let channels = self.channels.read();
        if let Some(sender) = channels.get(&event.project_id) {
            // A zero-receiver send just means nobody is watching.
            let _ = sender.send(event);
        }
    }

    /// Number of live subscribers for a project.
    pub fn subscriber_count(&self, project_id: Uuid) -> usize {
        self.channels
            .read()
            .get(&project_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels with no remaining subscribers.
    pub fn prune_idle(&self) {
        self.channels.write().retain(|_, s| s.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(project_id: Uuid, progress: u8) -> StatusEvent {
        StatusEvent::new(
            project_id,
            ReportRunStatus::Generating,
            ReportPhase::Validation,
            progress,
            "working",
        )
    }

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let publisher = StatusPublisher::new(true);
        let project = Uuid::new_v4();
        let mut rx = publisher.subscribe(project);

        for progress in [5u8, 15, 85, 100] {
            publisher.publish(event(project, progress));
        }

        for expected in [5u8, 15, 85, 100] {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.progress, expected);
            assert_eq!(received.project_id, project);
        }
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let publisher = StatusPublisher::new(true);
        let project = Uuid::new_v4();
        let _early = publisher.subscribe(project);

        publisher.publish(event(project, 5));
        let mut late = publisher.subscribe(project);
        publisher.publish(event(project, 15));

        let received = late.recv().await.unwrap();
        assert_eq!(received.progress, 15, "late subscriber skips history");
    }

    #[tokio::test]
    async fn projects_are_isolated() {
        let publisher = StatusPublisher::new(true);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = publisher.subscribe(a);
        let _rx_b = publisher.subscribe(b);

        publisher.publish(event(b, 50));
        publisher.publish(event(a, 10));

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received.project_id, a);
        assert_eq!(received.progress, 10);
    }

    #[test]
    fn disabled_publisher_is_silent() {
        let publisher = StatusPublisher::new(false);
        let project = Uuid::new_v4();
        let mut rx = publisher.subscribe(project);
        publisher.publish(event(project, 5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let publisher = StatusPublisher::new(true);
        let project = Uuid::new_v4();
        {
            let _rx = publisher.subscribe(project);
            assert_eq!(publisher.subscriber_count(project), 1);
        }
        publisher.prune_idle();
        assert_eq!(publisher.subscriber_count(project), 0);
    }

    #[test]
    fn progress_is_clamped() {
        let e = StatusEvent::new(
            Uuid::new_v4(),
            ReportRunStatus::Completed,
            ReportPhase::Completed,
            200,
            "done",
        );
        assert_eq!(e.progress, 100);
    }
}
