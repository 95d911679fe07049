//! Capture worker.
//!
//! One `capture` call fetches one URL under timeout/retry policy and writes
//! exactly one snapshot — success or failure — through the repository.
//! Transient failures (`timeout, dns, connection, http_5xx`) retry with
//! exponential backoff; `http_4xx, blocked, parse` fail fast. Every attempt
//! is traced; only the final attempt shapes the returned result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use vg_domain::config::ScraperConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{Snapshot, SnapshotMetadata, SnapshotOwner};
use vg_domain::{CancelToken, Result};
use vg_store::Repository;

use crate::browser::{validate_capture_url, FetchOptions, PageContent, PageFetcher, ResourceType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation-aware await
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Await `fut`, bailing out with `None` as soon as `cancel` fires.
pub async fn with_cancel<F: Future>(cancel: &CancelToken, fut: F) -> Option<F::Output> {
    tokio::pin!(fut);
    let mut ticker = tokio::time::interval(Duration::from_millis(25));
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    return None;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capture result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one `capture` call (the final attempt's result).
#[derive(Clone, Debug, Serialize)]
pub struct Capture {
    pub success: bool,
    pub http_status: Option<u16>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub title: Option<String>,
    pub content_length: Option<u64>,
    /// Short failure code from the taxonomy; `None` on success.
    pub error: Option<ErrorKind>,
    pub duration_ms: u64,
    pub attempts: u32,
}

/// A capture plus the snapshot it recorded.
#[derive(Clone, Debug)]
pub struct CaptureOutcome {
    pub capture: Capture,
    pub snapshot: Snapshot,
}

#[derive(Clone, Debug)]
pub struct CaptureOptions {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub blocked_resource_types: Vec<ResourceType>,
}

impl CaptureOptions {
    pub fn from_config(cfg: &ScraperConfig) -> Self {
        Self {
            timeout: cfg.capture_timeout(),
            max_attempts: cfg.max_retry_attempts.max(1),
            backoff_base: cfg.backoff_base(),
            backoff_cap: cfg.backoff_cap(),
            blocked_resource_types: ResourceType::parse_list(&cfg.blocked_resource_types),
        }
    }

    /// Shrink the per-attempt timeout to what's left of an outer budget.
    pub fn clamped_to(&self, remaining: Duration) -> Self {
        let mut opts = self.clone();
        opts.timeout = opts.timeout.min(remaining);
        opts
    }
}

/// Success ⇔ status in [200,399] and non-empty html. Returns the failure
/// kind otherwise.
fn classify_page(page: &PageContent) -> Option<ErrorKind> {
    match page.http_status {
        200..=399 => {
            if page.html.is_empty() {
                Some(ErrorKind::Parse)
            } else {
                None
            }
        }
        400..=499 => Some(ErrorKind::Http4xx),
        _ => Some(ErrorKind::Http5xx),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CaptureWorker {
    fetcher: Arc<dyn PageFetcher>,
    repo: Arc<dyn Repository>,
}

impl CaptureWorker {
    pub fn new(fetcher: Arc<dyn PageFetcher>, repo: Arc<dyn Repository>) -> Self {
        Self { fetcher, repo }
    }

    /// Capture one URL for one owner. Exactly one snapshot is written per
    /// call; a pre-validation failure of the URL writes none and surfaces
    /// `validation_error` to the caller.
    pub async fn capture(
        &self,
        owner: SnapshotOwner,
        raw_url: &str,
        opts: &CaptureOptions,
        cancel: &CancelToken,
    ) -> Result<CaptureOutcome> {
        let url = validate_capture_url(raw_url)?;
        let fetch_opts = FetchOptions {
            timeout: opts.timeout,
            blocked_resource_types: opts.blocked_resource_types.clone(),
        };

        let started = Instant::now();
        let mut attempts = 0u32;
        let mut failure: (ErrorKind, String) = (ErrorKind::Unknown, "no attempt ran".into());
        let mut last_page: Option<PageContent> = None;

        while attempts < opts.max_attempts {
            attempts += 1;
            if cancel.is_cancelled() {
                failure = (ErrorKind::Cancelled, "capture cancelled".into());
                break;
            }

            let attempt_result = match with_cancel(
                cancel,
                tokio::time::timeout(opts.timeout, self.fetcher.fetch_page(&url, &fetch_opts)),
            )
            .await
            {
                None => {
                    failure = (ErrorKind::Cancelled, "capture cancelled mid-fetch".into());
                    break;
                }
                Some(Err(_elapsed)) => Err((
                    ErrorKind::Timeout,
                    format!("capture timed out after {:?}", opts.timeout),
                )),
                Some(Ok(Err(err))) => Err((err.kind, err.message)),
                Some(Ok(Ok(page))) => match classify_page(&page) {
                    None => Ok(page),
                    Some(kind) => {
                        let message = format!("http status {}", page.http_status);
                        last_page = Some(page);
                        Err((kind, message))
                    }
                },
            };

            match attempt_result {
                Ok(page) => {
                    tracing::debug!(
                        url = %url,
                        attempt = attempts,
                        status = page.http_status,
                        bytes = page.html.len(),
                        "capture succeeded"
                    );
                    return self
                        .record(owner, started, attempts, Ok(page))
                        .await;
                }
                Err((kind, message)) => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempts,
                        max_attempts = opts.max_attempts,
                        error = %message,
                        kind = kind.code(),
                        "capture attempt failed"
                    );
                    failure = (kind, message);
                    if !kind.is_transient() || attempts >= opts.max_attempts {
                        break;
                    }
                    let backoff = backoff_delay(opts, attempts);
                    if with_cancel(cancel, tokio::time::sleep(backoff)).await.is_none() {
                        failure = (ErrorKind::Cancelled, "capture cancelled in backoff".into());
                        break;
                    }
                }
            }
        }

        self.record(owner, started, attempts, Err((failure, last_page)))
            .await
    }

    /// Write the one snapshot for this call and assemble the outcome.
    async fn record(
        &self,
        owner: SnapshotOwner,
        started: Instant,
        attempts: u32,
        result: std::result::Result<PageContent, ((ErrorKind, String), Option<PageContent>)>,
    ) -> Result<CaptureOutcome> {
        let duration_ms = started.elapsed().as_millis() as u64;
        let (capture, metadata, success, error_message) = match result {
            Ok(page) => {
                let metadata = SnapshotMetadata {
                    html: Some(page.html.clone()),
                    text: Some(page.text.clone()),
                    title: page.title.clone(),
                    http_status: Some(page.http_status),
                    content_length: Some(page.html.len() as u64),
                    duration_ms: Some(duration_ms),
                    extra: serde_json::Value::Null,
                };
                let capture = Capture {
                    success: true,
                    http_status: Some(page.http_status),
                    content_length: Some(page.html.len() as u64),
                    html: Some(page.html),
                    text: Some(page.text),
                    title: page.title,
                    error: None,
                    duration_ms,
                    attempts,
                };
                (capture, metadata, true, None)
            }
            Err(((kind, message), last_page)) => {
                let http_status = last_page.as_ref().map(|p| p.http_status);
                let metadata = SnapshotMetadata {
                    html: None,
                    text: None,
                    title: last_page.as_ref().and_then(|p| p.title.clone()),
                    http_status,
                    content_length: None,
                    duration_ms: Some(duration_ms),
                    extra: serde_json::Value::Null,
                };
                let capture = Capture {
                    success: false,
                    http_status,
                    html: None,
                    text: None,
                    title: None,
                    content_length: None,
                    error: Some(kind),
                    duration_ms,
                    attempts,
                };
                (capture, metadata, false, Some(format!("{}: {message}", kind.code())))
            }
        };

        let snapshot = self
            .repo
            .put_snapshot(owner, metadata, success, error_message)
            .await?;
        Ok(CaptureOutcome { capture, snapshot })
    }
}

fn backoff_delay(opts: &CaptureOptions, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let scaled = opts.backoff_base * 2u32.saturating_pow(exp);
    scaled.min(opts.backoff_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use reqwest::Url;
    use uuid::Uuid;

    use vg_domain::model::{Competitor, Project};
    use vg_store::InMemoryRepository;

    /// Scripted fetcher: returns the scripted outcome per attempt, then
    /// repeats the last entry.
    struct ScriptedFetcher {
        script: Vec<std::result::Result<PageContent, (ErrorKind, &'static str)>>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<std::result::Result<PageContent, (ErrorKind, &'static str)>>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(&self, _url: &Url, _opts: &FetchOptions) -> Result<PageContent> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let idx = n.min(self.script.len() - 1);
            match &self.script[idx] {
                Ok(page) => Ok(page.clone()),
                Err((kind, msg)) => Err(Error::new(*kind, *msg)),
            }
        }
    }

    fn page(status: u16, html: &str) -> PageContent {
        PageContent {
            html: html.to_string(),
            text: html.to_string(),
            title: Some("Page".into()),
            http_status: status,
            duration: Duration::from_millis(5),
        }
    }

    fn opts() -> CaptureOptions {
        CaptureOptions {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(4),
            blocked_resource_types: vec![],
        }
    }

    async fn competitor_owner(repo: &InMemoryRepository) -> SnapshotOwner {
        let project = repo
            .create_project(Project::new("p", "u"))
            .await
            .unwrap();
        let competitor = repo
            .create_competitor(Competitor {
                id: Uuid::new_v4(),
                name: "Globex".into(),
                website: "https://globex.example".into(),
                description: None,
                industry: None,
            })
            .await
            .unwrap();
        repo.attach_competitor(project.id, competitor.id)
            .await
            .unwrap();
        SnapshotOwner::Competitor(competitor.id)
    }

    #[tokio::test]
    async fn success_records_one_snapshot() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(page(200, "<html>pricing</html>"))]));
        let worker = CaptureWorker::new(fetcher.clone(), repo.clone());

        let out = worker
            .capture(owner, "https://globex.example", &opts(), &CancelToken::new())
            .await
            .unwrap();

        assert!(out.capture.success);
        assert_eq!(out.capture.http_status, Some(200));
        assert_eq!(out.capture.attempts, 1);
        assert!(out.capture.html.as_deref().unwrap().len() >= 1);
        assert_eq!(fetcher.calls(), 1);

        let stored = repo.recent_snapshots(owner, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].capture_success);
        assert_eq!(stored[0].metadata.http_status, Some(200));
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err((ErrorKind::Connection, "refused")),
            Err((ErrorKind::Http5xx, "bad gateway")),
            Ok(page(200, "<html>ok</html>")),
        ]));
        let worker = CaptureWorker::new(fetcher.clone(), repo.clone());

        let out = worker
            .capture(owner, "https://globex.example", &opts(), &CancelToken::new())
            .await
            .unwrap();
        assert!(out.capture.success);
        assert_eq!(out.capture.attempts, 3);
        assert_eq!(fetcher.calls(), 3);

        // Only the final attempt yields a snapshot.
        assert_eq!(repo.recent_snapshots(owner, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn http_4xx_fails_fast() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(page(404, "<html>gone</html>"))]));
        let worker = CaptureWorker::new(fetcher.clone(), repo.clone());

        let out = worker
            .capture(owner, "https://globex.example", &opts(), &CancelToken::new())
            .await
            .unwrap();
        assert!(!out.capture.success);
        assert_eq!(out.capture.error, Some(ErrorKind::Http4xx));
        assert_eq!(out.capture.attempts, 1);
        assert_eq!(fetcher.calls(), 1);

        let stored = repo.latest_snapshot(owner).await.unwrap().unwrap();
        assert!(!stored.capture_success);
        assert_eq!(stored.metadata.http_status, Some(404));
        assert!(stored.error_message.as_deref().unwrap().starts_with("http_4xx"));
    }

    #[tokio::test]
    async fn exhausted_retries_record_failure() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Err((ErrorKind::Timeout, "slow"))]));
        let worker = CaptureWorker::new(fetcher.clone(), repo.clone());

        let out = worker
            .capture(owner, "https://globex.example", &opts(), &CancelToken::new())
            .await
            .unwrap();
        assert!(!out.capture.success);
        assert_eq!(out.capture.error, Some(ErrorKind::Timeout));
        assert_eq!(out.capture.attempts, 3);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn empty_body_is_parse_failure() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(page(200, ""))]));
        let worker = CaptureWorker::new(fetcher, repo.clone());

        let out = worker
            .capture(owner, "https://globex.example", &opts(), &CancelToken::new())
            .await
            .unwrap();
        assert!(!out.capture.success);
        assert_eq!(out.capture.error, Some(ErrorKind::Parse));
        assert_eq!(out.capture.attempts, 1, "parse failures do not retry");
    }

    #[tokio::test]
    async fn cancelled_capture_records_cancelled_snapshot() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(page(200, "<html>x</html>"))]));
        let worker = CaptureWorker::new(fetcher, repo.clone());

        let cancel = CancelToken::new();
        cancel.cancel();
        let out = worker
            .capture(owner, "https://globex.example", &opts(), &cancel)
            .await
            .unwrap();
        assert!(!out.capture.success);
        assert_eq!(out.capture.error, Some(ErrorKind::Cancelled));

        let stored = repo.latest_snapshot(owner).await.unwrap().unwrap();
        assert!(!stored.capture_success);
        assert!(stored
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("cancelled"));
    }

    #[tokio::test]
    async fn invalid_url_writes_no_snapshot() {
        let repo = Arc::new(InMemoryRepository::new());
        let owner = competitor_owner(&repo).await;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(page(200, "<html>x</html>"))]));
        let worker = CaptureWorker::new(fetcher, repo.clone());

        let err = worker
            .capture(owner, "not-a-url", &opts(), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(repo.latest_snapshot(owner).await.unwrap().is_none());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let o = CaptureOptions {
            timeout: Duration::from_secs(1),
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(350),
            blocked_resource_types: vec![],
        };
        assert_eq!(backoff_delay(&o, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&o, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&o, 3), Duration::from_millis(350));
        assert_eq!(backoff_delay(&o, 4), Duration::from_millis(350));
    }

    #[test]
    fn page_classification() {
        assert_eq!(classify_page(&page(200, "<x>")), None);
        assert_eq!(classify_page(&page(302, "<x>")), None);
        assert_eq!(classify_page(&page(200, "")), Some(ErrorKind::Parse));
        assert_eq!(classify_page(&page(404, "<x>")), Some(ErrorKind::Http4xx));
        assert_eq!(classify_page(&page(503, "<x>")), Some(ErrorKind::Http5xx));
    }
}
