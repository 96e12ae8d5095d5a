//! Rate-limited LLM service.
//!
//! Grounded on `elm/ords/services/base.py::RateLimitedService` (the
//! `can_process` gate against a `TimeBoundedUsageTracker`) composed with
//! the retry/backoff helper in [`crate::retry`] and the exact per-message
//! token framing from `elm/ords/services/openai.py::count_tokens`.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Service, ServiceRequest, ServiceResponse};
use crate::chunk::Tokenizer;
use crate::llm::{count_framed_tokens, BadRequestError, LlmClient};
use crate::retry::{retry_with_backoff, Attempt, BackoffConfig};
use crate::usage::TimeBoundedUsageTracker;

/// Window over which `rate_limit` (tokens) is enforced, matching the
/// original's minute-scale sliding window.
const RATE_WINDOW_SECONDS: f64 = 60.0;

pub struct LlmService {
    client: Arc<dyn LlmClient>,
    tokenizer: Arc<dyn Tokenizer>,
    rate_limit: f64,
    rate_tracker: StdMutex<TimeBoundedUsageTracker>,
    backoff: BackoffConfig,
    max_concurrent_jobs: usize,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>, tokenizer: Arc<dyn Tokenizer>, rate_limit: f64) -> Self {
        Self::with_backoff(client, tokenizer, rate_limit, BackoffConfig::default())
    }

    pub fn with_backoff(
        client: Arc<dyn LlmClient>,
        tokenizer: Arc<dyn Tokenizer>,
        rate_limit: f64,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            client,
            tokenizer,
            rate_limit,
            rate_tracker: StdMutex::new(TimeBoundedUsageTracker::new(RATE_WINDOW_SECONDS)),
            backoff,
            max_concurrent_jobs: 10_000,
        }
    }
}

#[async_trait]
impl Service for LlmService {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    fn can_process(&self) -> bool {
        let mut tracker = self.rate_tracker.lock().unwrap();
        tracker.total() < self.rate_limit
    }

    async fn process(&self, request: ServiceRequest) -> anyhow::Result<ServiceResponse> {
        let ServiceRequest::Llm {
            messages,
            model,
            usage_tracker,
            usage_sub_label,
            timeout,
        } = request
        else {
            anyhow::bail!("LlmService received a non-Llm request");
        };

        let prompt_tokens = count_framed_tokens(&messages, self.tokenizer.as_ref()) as u64;

        let result = retry_with_backoff(&self.backoff, |attempt| {
            let messages = messages.clone();
            let model = model.clone();
            let per_attempt_timeout = timeout * 2u32.pow(attempt);
            async move {
                // Every attempt is a real request against the provider, so
                // the sliding-window rate tracker sees it regardless of
                // outcome -- it bounds provider-side quota usage, not
                // reported cost.
                self.rate_tracker.lock().unwrap().add(prompt_tokens as f64);

                match tokio::time::timeout(per_attempt_timeout, self.client.chat(&messages, &model)).await {
                    Ok(Ok(completion)) => Attempt::Ok(completion),
                    Ok(Err(e)) if e.downcast_ref::<BadRequestError>().is_some() => {
                        warn!(error = %e, "LLM provider rejected request as malformed; not retrying");
                        Attempt::Fatal(e)
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, attempt, "LLM call failed, will retry");
                        Attempt::Retryable(e)
                    }
                    Err(_elapsed) => Attempt::Retryable(anyhow::anyhow!(
                        "LLM call timed out after {per_attempt_timeout:?}"
                    )),
                }
            }
        })
        .await;

        match result {
            Ok(completion) => {
                if let Some(tracker) = usage_tracker {
                    let mut tracker = tracker.lock().await;
                    tracker.add_call(
                        usage_sub_label.as_deref(),
                        completion.usage.prompt_tokens,
                        completion.usage.completion_tokens,
                    );
                }
                Ok(ServiceResponse::Llm(Some(completion.content)))
            }
            Err(exhausted) if exhausted.max_retries == 0 => {
                // A Fatal (bad-request-class) error: record the attempt
                // that was made and return `None` rather than propagating.
                if let Some(tracker) = usage_tracker {
                    let mut tracker = tracker.lock().await;
                    tracker.add_call(usage_sub_label.as_deref(), prompt_tokens, 0);
                }
                Ok(ServiceResponse::Llm(None))
            }
            Err(exhausted) => Err(crate::error::OrdsError::RetriesExhausted {
                retries: exhausted.max_retries,
                source: exhausted.source,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CharEstimateTokenizer;
    use crate::llm::{ChatCompletion, ChatMessage, Usage};
    use std::sync::atomic::{AtomicU32 as Counter, Ordering};

    struct FlakyClient {
        calls: Counter,
        fail_first_n: u32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn chat(&self, _messages: &[ChatMessage], _model: &str) -> anyhow::Result<ChatCompletion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                anyhow::bail!("transient upstream error");
            }
            Ok(ChatCompletion {
                content: "done".into(),
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
            })
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct RejectingClient;

    #[async_trait]
    impl LlmClient for RejectingClient {
        async fn chat(&self, _messages: &[ChatMessage], _model: &str) -> anyhow::Result<ChatCompletion> {
            Err(BadRequestError("bad prompt".into()).into())
        }

        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("hi")]
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let client = Arc::new(FlakyClient {
            calls: Counter::new(0),
            fail_first_n: 2,
        });
        let service = LlmService::with_backoff(
            client,
            Arc::new(CharEstimateTokenizer),
            1_000_000.0,
            BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_retries: 5,
                ..Default::default()
            },
        );

        let response = service
            .process(ServiceRequest::Llm {
                messages: messages(),
                model: "m".into(),
                usage_tracker: None,
                usage_sub_label: None,
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        assert_eq!(response.into_llm().unwrap().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn bad_request_is_swallowed_not_retried() {
        let service = LlmService::new(Arc::new(RejectingClient), Arc::new(CharEstimateTokenizer), 1_000_000.0);

        let response = service
            .process(ServiceRequest::Llm {
                messages: messages(),
                model: "m".into(),
                usage_tracker: None,
                usage_sub_label: None,
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        assert_eq!(response.into_llm().unwrap(), None);
    }

    #[tokio::test]
    async fn can_process_false_once_rate_limit_is_hit() {
        let service = LlmService::new(Arc::new(RejectingClient), Arc::new(CharEstimateTokenizer), 5.0);
        assert!(service.can_process());
        service.rate_tracker.lock().unwrap().add(10.0);
        assert!(!service.can_process());
    }

    #[tokio::test(start_paused = true)]
    async fn usage_tracker_not_incremented_on_retried_failures_only_final_attempt() {
        let client = Arc::new(FlakyClient {
            calls: Counter::new(0),
            fail_first_n: 1,
        });
        let service = LlmService::with_backoff(
            client,
            Arc::new(CharEstimateTokenizer),
            1_000_000.0,
            BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_retries: 5,
                ..Default::default()
            },
        );
        let tokio_tracker = Arc::new(tokio::sync::Mutex::new(crate::usage::UsageTracker::new("Test County, State")));

        let _ = service
            .process(ServiceRequest::Llm {
                messages: messages(),
                model: "m".into(),
                usage_tracker: Some(tokio_tracker.clone()),
                usage_sub_label: None,
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        let final_tracker = tokio_tracker.lock().await;
        let default = final_tracker.usage.labels.get("default").unwrap();
        assert_eq!(default.requests, 1, "only the final successful attempt should count");
    }
}
