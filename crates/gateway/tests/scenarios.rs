//! End-to-end scenarios for the report pipeline: immediate happy path,
//! timeout → queue fallback, concurrency-cap degradation, partial-data
//! reports, zombie prevention, and the duplicate-creation race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use uuid::Uuid;

use vg_domain::config::Config;
use vg_domain::error::ErrorKind;
use vg_domain::model::{
    Competitor, Product, Project, ReportStatus, SnapshotMetadata, SnapshotOwner,
};
use vg_domain::Result;
use vg_gateway::coordinator::{ProcessingMethod, ReportOptions};
use vg_gateway::state::AppState;
use vg_gateway::status::{ReportRunStatus, StatusEvent};
use vg_providers::{GenerateRequest, GenerateResponse, StopReason, TextGenerator};
use vg_scraper::{FetchOptions, PageContent, PageFetcher};
use vg_store::{project_creation_key, InMemoryRepository, Repository};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
enum FetchBehavior {
    Ok,
    Fail(ErrorKind),
    Slow(Duration),
}

struct ScenarioFetcher {
    per_host: parking_lot::Mutex<HashMap<String, FetchBehavior>>,
    default: FetchBehavior,
}

impl ScenarioFetcher {
    fn all_ok() -> Self {
        Self {
            per_host: parking_lot::Mutex::new(HashMap::new()),
            default: FetchBehavior::Ok,
        }
    }

    fn all_failing(kind: ErrorKind) -> Self {
        Self {
            per_host: parking_lot::Mutex::new(HashMap::new()),
            default: FetchBehavior::Fail(kind),
        }
    }

    fn set_host(&self, host: &str, behavior: FetchBehavior) {
        self.per_host.lock().insert(host.to_string(), behavior);
    }
}

#[async_trait]
impl PageFetcher for ScenarioFetcher {
    async fn fetch_page(&self, url: &Url, _opts: &FetchOptions) -> Result<PageContent> {
        let host = url.host_str().unwrap_or_default().to_string();
        let behavior = self
            .per_host
            .lock()
            .get(&host)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        if let FetchBehavior::Slow(delay) = behavior {
            tokio::time::sleep(delay).await;
        }
        match behavior {
            FetchBehavior::Ok | FetchBehavior::Slow(_) => Ok(PageContent {
                html: format!("<html><title>{host}</title>{}</html>", "plans ".repeat(40)),
                text: "plans ".repeat(40),
                title: Some(host),
                http_status: 200,
                duration: Duration::from_millis(2),
            }),
            FetchBehavior::Fail(kind) => {
                Err(vg_domain::Error::new(kind, format!("stubbed {} for {host}", kind.code())))
            }
        }
    }
}

/// Generator returning well-formed findings after an optional delay.
struct ScriptedLlm {
    delay: Duration,
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(GenerateResponse {
            content: r#"{"overall_position":"competitive","opportunity_score":75,
                "confidence_score":85,"priority_score":65,
                "key_findings":["pricing gap identified"],
                "competitive_intelligence":"The tracked set is moving upmarket.",
                "recommendations":{"immediate":["tighten pricing page"],
                                    "short_term":["refresh comparison assets"],
                                    "long_term":["expand integrations"]}}"#
                .to_string(),
            stop_reason: StopReason::EndTurn,
            usage: None,
        })
    }

    fn generator_id(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_config() -> Config {
    let mut config = Config::default();
    config.scraper.capture_timeout_ms = 500;
    config.scraper.max_retry_attempts = 3;
    config.scraper.retry_backoff_base_ms = 1;
    config.scraper.retry_backoff_cap_ms = 2;
    config.governor.domain_throttle_ms = 0;
    config.governor.acquire_wait_ms = 500;
    config.pipeline.deadline_reserve_ms = 50;
    config.pipeline.analysis_timeout_ms = 5_000;
    config.coordinator.immediate_timeout_ms = 5_000;
    config.coordinator.fallback_enqueue_delay_ms = 1;
    config.queue.state_path = String::new();
    config.queue.worker_timeout_ms = 10_000;
    config.queue.retry_backoff_ms = 1;
    config
}

struct Harness {
    state: AppState,
    repo: Arc<InMemoryRepository>,
    project_id: Uuid,
    competitor_ids: Vec<Uuid>,
}

async fn harness(
    config: Config,
    fetcher: ScenarioFetcher,
    llm_delay: Option<Duration>,
    competitors: usize,
) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let generator: Option<Arc<dyn TextGenerator>> =
        llm_delay.map(|delay| Arc::new(ScriptedLlm { delay }) as Arc<dyn TextGenerator>);
    let state = AppState::build(
        Arc::new(config),
        repo.clone(),
        Arc::new(fetcher),
        generator,
    );

    let project = repo
        .create_project(Project::new("acme-intel", "analyst-1"))
        .await
        .unwrap();
    repo.create_product(Product {
        id: Uuid::new_v4(),
        project_id: project.id,
        name: "Acme Widget".into(),
        website: "https://acme.example".into(),
        positioning: Some("the fastest widget".into()),
        industry: Some("tooling".into()),
        customer_description: Some("builders".into()),
        problem_statement: None,
    })
    .await
    .unwrap();

    let mut competitor_ids = Vec::new();
    for i in 0..competitors {
        let competitor = repo
            .create_competitor(Competitor {
                id: Uuid::new_v4(),
                name: format!("Rival {i}"),
                website: format!("https://rival{i}.example"),
                description: None,
                industry: None,
            })
            .await
            .unwrap();
        repo.attach_competitor(project.id, competitor.id)
            .await
            .unwrap();
        competitor_ids.push(competitor.id);
    }

    Harness {
        state,
        repo,
        project_id: project.id,
        competitor_ids,
    }
}

fn fresh_metadata() -> SnapshotMetadata {
    SnapshotMetadata {
        html: Some("h".repeat(500)),
        text: Some("plans and pricing ".repeat(30)),
        title: Some("Rival".into()),
        http_status: Some(200),
        content_length: Some(500),
        duration_ms: Some(25),
        extra: serde_json::Value::Null,
    }
}

async fn snapshot_competitors(h: &Harness) {
    for id in &h.competitor_ids {
        h.repo
            .put_snapshot(SnapshotOwner::Competitor(*id), fresh_metadata(), true, None)
            .await
            .unwrap();
    }
}

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>,
) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — happy immediate path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_immediate_path() {
    let h = harness(
        test_config(),
        ScenarioFetcher::all_ok(),
        Some(Duration::ZERO),
        3,
    )
    .await;
    snapshot_competitors(&h).await;
    let mut events = h.state.status.subscribe(h.project_id);

    let result = h
        .state
        .coordinator
        .process_initial_report(
            h.project_id,
            &ReportOptions {
                timeout: Some(Duration::from_secs(45)),
                ..ReportOptions::default()
            },
        )
        .await;

    assert!(result.success);
    assert_eq!(result.processing_method, ProcessingMethod::Immediate);
    assert!(!result.timeout_exceeded);
    assert!(!result.queue_scheduled);
    let report_id = result.report_id.expect("immediate result carries report id");

    let report = h.repo.report(report_id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);

    let versions = h.repo.report_versions(report_id).await.unwrap();
    assert!(!versions.is_empty());
    let version = &versions[0];
    assert!(version.metadata.completeness_score >= 85.0);
    assert!(matches!(
        version.metadata.freshness,
        vg_domain::model::DataFreshness::New | vg_domain::model::DataFreshness::Mixed
    ));
    assert!(!version.content.trim().is_empty());

    // Status phases: 5 (validation), 15 (capture), 85 (render), 100 (done).
    let seen = drain_events(&mut events);
    let progresses: Vec<u8> = seen.iter().map(|e| e.progress).collect();
    for expected in [5u8, 15, 85, 100] {
        assert!(
            progresses.contains(&expected),
            "missing progress {expected} in {progresses:?}"
        );
    }
    assert_eq!(seen.last().unwrap().status, ReportRunStatus::Completed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — timeout falls back to the queue, worker completes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn timeout_falls_back_to_queue_and_worker_completes() {
    // The generator sleeps well past the immediate timeout.
    let h = harness(
        test_config(),
        ScenarioFetcher::all_ok(),
        Some(Duration::from_millis(800)),
        2,
    )
    .await;
    snapshot_competitors(&h).await;

    let result = h
        .state
        .coordinator
        .process_initial_report(
            h.project_id,
            &ReportOptions {
                timeout: Some(Duration::from_millis(200)),
                ..ReportOptions::default()
            },
        )
        .await;

    assert!(result.success, "fallback is still a successful outcome");
    assert_eq!(result.processing_method, ProcessingMethod::Fallback);
    assert!(result.timeout_exceeded);
    assert!(result.fallback_used);
    assert!(result.queue_scheduled);
    assert!(result.estimated_queue_completion.is_some());
    let task_id = result.task_id.expect("fallback carries a task id");

    // Drive the queue worker by hand.
    let task = h.state.queue.next_task().await;
    assert_eq!(task.id, task_id);
    assert!(task.fallback);
    let mut events = h.state.status.subscribe(h.project_id);
    h.state.coordinator.run_queued_task(task).await;

    // The queued run completed the report.
    let reports = h.repo.list_reports().await.unwrap();
    let completed: Vec<_> = reports
        .iter()
        .filter(|r| r.status == ReportStatus::Completed)
        .collect();
    assert_eq!(completed.len(), 1);
    let versions = h.repo.report_versions(completed[0].id).await.unwrap();
    assert!(!versions.is_empty());

    let seen = drain_events(&mut events);
    assert!(seen
        .iter()
        .any(|e| e.status == ReportRunStatus::Completed && e.progress == 100));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — concurrency cap degrades the overflow request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrency_cap_queues_the_overflow() {
    let mut config = test_config();
    config.coordinator.max_concurrent_processing = 2;
    // A small generator delay keeps every immediate pipeline in flight
    // while the later requests hit admission.
    let h = harness(
        config,
        ScenarioFetcher::all_ok(),
        Some(Duration::from_millis(50)),
        1,
    )
    .await;
    snapshot_competitors(&h).await;

    // Two more projects so the three requests target distinct projects.
    let mut project_ids = vec![h.project_id];
    for i in 0..2 {
        let project = h
            .repo
            .create_project(Project::new(format!("intel-{i}"), "analyst-1"))
            .await
            .unwrap();
        h.repo
            .create_product(Product {
                id: Uuid::new_v4(),
                project_id: project.id,
                name: format!("Widget {i}"),
                website: "https://acme.example".into(),
                positioning: None,
                industry: None,
                customer_description: None,
                problem_statement: None,
            })
            .await
            .unwrap();
        project_ids.push(project.id);
    }

    let opts = ReportOptions::default();
    let (a, b, c) = tokio::join!(
        h.state
            .coordinator
            .process_initial_report(project_ids[0], &opts),
        h.state
            .coordinator
            .process_initial_report(project_ids[1], &opts),
        h.state
            .coordinator
            .process_initial_report(project_ids[2], &opts),
    );

    let methods = [a.processing_method, b.processing_method, c.processing_method];
    let queued = methods
        .iter()
        .filter(|m| **m == ProcessingMethod::Queued)
        .count();
    let immediate = methods
        .iter()
        .filter(|m| **m == ProcessingMethod::Immediate)
        .count();
    assert_eq!(queued, 1, "exactly one request degrades to the queue: {methods:?}");
    assert_eq!(immediate, 2);
    assert!([a, b, c].iter().all(|r| r.success));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4 — partial data still produces a usable report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn partial_data_report_lists_limitations() {
    // No stored snapshots, every capture times out (retried, then fails).
    let h = harness(
        test_config(),
        ScenarioFetcher::all_failing(ErrorKind::Timeout),
        Some(Duration::ZERO),
        2,
    )
    .await;

    let result = h
        .state
        .coordinator
        .process_initial_report(h.project_id, &ReportOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.processing_method, ProcessingMethod::Immediate);
    let report_id = result.report_id.unwrap();

    let versions = h.repo.report_versions(report_id).await.unwrap();
    let version = &versions[0];
    assert!(version.metadata.has_data_limitations);
    assert!(version.content.contains("Data Completeness & Limitations"));
    assert!(version.content.contains("[high] Rival 0"));
    assert!(version.content.contains("[high] Rival 1"));

    // Confidence clamp: the rendered confidence is bounded by
    // completeness − 10.
    let completeness = version.metadata.completeness_score;
    let clamped = (completeness - 10.0).max(0.0).round() as i64;
    assert!(
        version
            .content
            .contains(&format!("confidence: {clamped}/100")),
        "expected confidence {clamped} in summary: {}",
        version.content
    );

    // Both competitors got failed snapshots recorded (one per capture call).
    for id in &h.competitor_ids {
        let snapshot = h
            .repo
            .latest_snapshot(SnapshotOwner::Competitor(*id))
            .await
            .unwrap()
            .unwrap();
        assert!(!snapshot.capture_success);
        assert!(snapshot
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("timeout"));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — zombie prevention
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn completed_without_content_is_rejected() {
    let h = harness(
        test_config(),
        ScenarioFetcher::all_ok(),
        None,
        1,
    )
    .await;
    let product_id = h
        .repo
        .find_project_with_graph(h.project_id)
        .await
        .unwrap()
        .unwrap()
        .products[0]
        .id;
    let report = h.repo.create_report(h.project_id, product_id).await.unwrap();

    // Force an empty artifact, then try to complete.
    h.repo
        .create_report_version(
            report.id,
            String::new(),
            vec![],
            vg_domain::model::ReportVersionMetadata {
                completeness_score: 0.0,
                freshness: vg_domain::model::DataFreshness::Basic,
                quality_tier: vg_domain::model::QualityTier::Basic,
                template_id: "standard".into(),
                has_data_limitations: true,
            },
        )
        .await
        .unwrap();

    let err = h
        .repo
        .update_report_status(report.id, ReportStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.message, "no ReportVersions");

    // Failing the report is still allowed.
    assert!(h
        .repo
        .update_report_status(report.id, ReportStatus::Failed)
        .await
        .is_ok());

    // The sweep flags nothing, because the guard held.
    let zombies = vg_gateway::housekeeping::zombie_report_sweep(&h.state).await;
    assert_eq!(zombies, 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — duplicate project creation race
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn duplicate_project_creation_race() {
    let h = harness(test_config(), ScenarioFetcher::all_ok(), None, 0).await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let repo = h.repo.clone();
        let locks = h.state.creation_locks.clone();
        handles.push(tokio::spawn(async move {
            let key = project_creation_key("analyst-9", "Shared Name");
            let _guard = locks.acquire(&key).await;
            repo.create_project(Project::new("Shared Name", "analyst-9"))
                .await
        }));
    }

    let mut ok = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(err) => {
                assert_eq!(err.kind, ErrorKind::Duplicate);
                assert_eq!(err.message, "Duplicate project name");
                duplicates += 1;
            }
        }
    }
    assert_eq!(ok, 1, "exactly one creation wins");
    assert_eq!(duplicates, 4);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-cutting invariants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn repeated_admission_dedups_to_one_queue_task() {
    let mut config = test_config();
    config.coordinator.max_concurrent_processing = 1;
    let fetcher = ScenarioFetcher::all_ok();
    // A slow capture keeps the blocker's slot occupied while the later
    // requests arrive.
    fetcher.set_host("rival0.example", FetchBehavior::Slow(Duration::from_millis(400)));
    let h = harness(config, fetcher, None, 1).await;

    // Saturate the only slot so subsequent requests queue.
    let blocker = {
        let coordinator = h.state.coordinator.clone();
        let project_id = h.project_id;
        tokio::spawn(async move {
            coordinator
                .process_initial_report(project_id, &ReportOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Two more projects' worth of requests for the SAME project id: the
    // queue dedups on the stable task key.
    let other = h
        .repo
        .create_project(Project::new("other", "analyst-1"))
        .await
        .unwrap();
    let first = h
        .state
        .coordinator
        .process_initial_report(other.id, &ReportOptions::default())
        .await;
    let second = h
        .state
        .coordinator
        .process_initial_report(other.id, &ReportOptions::default())
        .await;

    assert_eq!(first.processing_method, ProcessingMethod::Queued);
    assert_eq!(second.processing_method, ProcessingMethod::Queued);
    assert_eq!(first.task_id, second.task_id);
    assert_eq!(h.state.queue.depth(), 1, "dedup window collapses the retry");

    let _ = blocker.await.unwrap();
}

#[tokio::test]
async fn rollout_gate_rejects_excluded_projects() {
    let mut config = test_config();
    config.features.comparative_rollout_percentage = 0;
    let h = harness(config, ScenarioFetcher::all_ok(), None, 1).await;

    let result = h
        .state
        .coordinator
        .process_initial_report(h.project_id, &ReportOptions::default())
        .await;
    assert!(!result.success);
    assert_eq!(result.processing_method, ProcessingMethod::Failed);
    assert!(result.error.unwrap().starts_with("validation_error"));
}
