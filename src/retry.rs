//! Exponential backoff retry helper.
//!
//! Grounded on the original `async_retry_with_exponential_backoff` decorator:
//! the delay is *compounding* — each retry multiplies the running delay by
//! `exponential_base * (1 + jitter * U(0,1))` rather than recomputing from
//! scratch, so accumulated jitter from earlier attempts carries forward.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// The outcome of a single attempt: either a value, a retryable error, or a
/// terminal error that should propagate without retrying (e.g. a
/// bad-request-class LLM error).
pub enum Attempt<T, E> {
    Ok(T),
    Retryable(E),
    Fatal(E),
}

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            exponential_base: 4.0,
            jitter: true,
            max_retries: 3,
        }
    }
}

/// Error returned once retries are exhausted.
#[derive(Debug, thiserror::Error)]
#[error("maximum number of retries ({max_retries}) exceeded: {source}")]
pub struct RetriesExhausted<E: std::fmt::Display + std::fmt::Debug> {
    pub max_retries: u32,
    pub source: E,
}

/// Run `attempt` up to `cfg.max_retries` additional times, sleeping with
/// compounding exponential backoff between retryable failures. `attempt` is
/// called with the zero-based retry count so callers (like the LLM service)
/// can e.g. double a timeout on each call.
pub async fn retry_with_backoff<T, E, F, Fut>(
    cfg: &BackoffConfig,
    mut attempt: F,
) -> Result<T, RetriesExhausted<E>>
where
    E: std::fmt::Display + std::fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut delay = cfg.base_delay;
    let mut retries = 0u32;

    loop {
        match attempt(retries).await {
            Attempt::Ok(value) => return Ok(value),
            Attempt::Fatal(e) => {
                // Fatal errors don't count against the retry budget and
                // aren't retried; wrap for a uniform return type.
                return Err(RetriesExhausted {
                    max_retries: 0,
                    source: e,
                });
            }
            Attempt::Retryable(e) => {
                retries += 1;
                if retries > cfg.max_retries {
                    return Err(RetriesExhausted {
                        max_retries: cfg.max_retries,
                        source: e,
                    });
                }
                let jitter_factor = if cfg.jitter {
                    1.0 + rand::thread_rng().gen::<f64>()
                } else {
                    1.0
                };
                delay = delay.mul_f64(cfg.exponential_base * jitter_factor);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
