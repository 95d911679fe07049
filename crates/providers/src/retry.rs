//! Retrying wrapper around any [`TextGenerator`].
//!
//! Transient generation failures are retried up to the configured attempt
//! count with exponential backoff; exhaustion surfaces `LlmUnavailable`,
//! which the analysis stage converts into a placeholder analysis.

use std::sync::Arc;
use std::time::Duration;

use vg_domain::Result;

use crate::{GenerateRequest, GenerateResponse, TextGenerator};

pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for RetryingGenerator {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.generate(req.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(attempts = attempt, error = %err, "generation exhausted retries");
                    return Err(err);
                }
            }
        }
    }

    fn generator_id(&self) -> &str {
        self.inner.generator_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use vg_domain::error::{Error, ErrorKind};

    use crate::StopReason;

    struct FlakyGenerator {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl TextGenerator for FlakyGenerator {
        async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::new(ErrorKind::LlmUnavailable, "overloaded"))
            } else {
                Ok(GenerateResponse {
                    content: "ok".into(),
                    stop_reason: StopReason::EndTurn,
                    usage: None,
                })
            }
        }

        fn generator_id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_budget() {
        let flaky = Arc::new(FlakyGenerator {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let retrying =
            RetryingGenerator::new(flaky.clone(), 3, Duration::from_millis(10));
        let out = retrying.generate(GenerateRequest::default()).await.unwrap();
        assert_eq!(out.content, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_and_surfaces_llm_unavailable() {
        let flaky = Arc::new(FlakyGenerator {
            calls: AtomicU32::new(0),
            fail_first: 10,
        });
        let retrying =
            RetryingGenerator::new(flaky.clone(), 3, Duration::from_millis(10));
        let err = retrying
            .generate(GenerateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LlmUnavailable);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn id_passes_through() {
        let flaky = Arc::new(FlakyGenerator {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let retrying = RetryingGenerator::new(flaky, 3, Duration::from_millis(10));
        assert_eq!(retrying.generator_id(), "flaky");
    }
}
