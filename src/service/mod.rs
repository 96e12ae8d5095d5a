//! Cooperative service runtime.
//!
//! Grounded on `elm/ords/services/base.py`'s `Service`/`RateLimitedService`
//! ABC and `elm/ords/services/provider.py`'s `_RunningProvider` dispatch
//! loop. Python's `Service.call(*args, **kwargs)` talks to an
//! `asyncio.Future`; since Rust can't pass an untyped argument bag through a
//! trait object, calls here go through the [`ServiceRequest`] /
//! [`ServiceResponse`] enums instead — one variant per concrete service,
//! matched on by [`ServiceProvider::call`] callers via the `into_*` helpers.
//!
//! RKnowledge's `#[async_trait]` convention (see
//! `examples/Algiras-RKnowledge/src/llm/mod.rs`'s `LlmProviderTrait`) is
//! reused for [`Service`] itself.

mod fs_services;
mod llm_service;
mod provider;
mod queue;

pub use fs_services::{sanitize_filename, FileCacheService, FileWriterService, UsageRecorderService};
pub use llm_service::LlmService;
pub use provider::ServiceProvider;
pub(crate) use queue::JobEnvelope;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::document::Location;
use crate::llm::ChatMessage;
use crate::usage::UsageTracker;

/// Request payloads accepted by the registered services. Each concrete
/// service only ever receives the variant it registered for; the provider
/// routes by service name, not by matching on this enum, so a mismatch here
/// indicates a caller bug rather than a runtime condition to recover from.
#[derive(Debug, Clone)]
pub enum ServiceRequest {
    /// A chat-completion call. Mirrors the keyword arguments
    /// `StructuredLLMCaller.call` passes to `llm_service.call` in the
    /// original: messages, model, an optional shared usage tracker and
    /// sub-label, and a per-attempt timeout that the service doubles on
    /// each retry.
    Llm {
        messages: Vec<ChatMessage>,
        model: String,
        usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
        usage_sub_label: Option<String>,
        timeout: Duration,
    },
    /// A CPU-bound job (e.g. OCR) to run on the process pool.
    ProcessPool { input: Value },
    /// A blocking I/O job (e.g. a synchronous HTTP fetch) for the thread
    /// pool.
    ThreadPool { input: Value },
    /// Reserve a cache directory for `location`.
    FileCache { location: Location },
    /// Move `from` to `to`, creating parent directories as needed.
    FileMover { from: std::path::PathBuf, to: std::path::PathBuf },
    /// Write `contents` to `path`, creating parent directories as needed.
    /// Generalizes the original's `CleanedFileWriter`/`OrdDBFileWriter`
    /// (both of which are "serialize this string to a path under a
    /// configured output directory" with no other behavior).
    WriteFile { path: std::path::PathBuf, contents: String },
    /// Merge a location's usage tracker into the shared usage record.
    UsageRecord(crate::usage::UsageTracker),
}

#[derive(Debug, Clone)]
pub enum ServiceResponse {
    /// `None` when the LLM provider returned a non-retryable bad-request
    /// error — swallowed rather than propagated, per the original's
    /// "ignore and move on" handling of that class of failure.
    Llm(Option<String>),
    ProcessPool(Value),
    ThreadPool(Value),
    FileCache(std::path::PathBuf),
    FileMover,
    WriteFile(std::path::PathBuf),
    UsageRecord,
}

impl ServiceResponse {
    pub fn into_llm(self) -> anyhow::Result<Option<String>> {
        match self {
            ServiceResponse::Llm(s) => Ok(s),
            other => anyhow::bail!("expected Llm response, got {other:?}"),
        }
    }

    pub fn into_process_pool(self) -> anyhow::Result<Value> {
        match self {
            ServiceResponse::ProcessPool(v) => Ok(v),
            other => anyhow::bail!("expected ProcessPool response, got {other:?}"),
        }
    }

    pub fn into_thread_pool(self) -> anyhow::Result<Value> {
        match self {
            ServiceResponse::ThreadPool(v) => Ok(v),
            other => anyhow::bail!("expected ThreadPool response, got {other:?}"),
        }
    }

    pub fn into_file_cache(self) -> anyhow::Result<std::path::PathBuf> {
        match self {
            ServiceResponse::FileCache(p) => Ok(p),
            other => anyhow::bail!("expected FileCache response, got {other:?}"),
        }
    }

    pub fn into_write_file(self) -> anyhow::Result<std::path::PathBuf> {
        match self {
            ServiceResponse::WriteFile(p) => Ok(p),
            other => anyhow::bail!("expected WriteFile response, got {other:?}"),
        }
    }
}

/// A unit of queueable work, mirroring the Python `Service` ABC.
///
/// `can_process` must be cheap: the dispatcher calls it before pulling every
/// job off the queue.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name used to route [`ServiceProvider::call`] invocations; also used
    /// as the per-location log label for calls through this service.
    fn name(&self) -> &'static str;

    /// How many submissions the dispatcher may have in flight for this
    /// service at once, before it stops pulling from the queue regardless of
    /// `can_process`. Mirrors `Service.MAX_CONCURRENT_JOBS`.
    fn max_concurrent_jobs(&self) -> usize {
        10_000
    }

    /// Fast-running predicate: may this service accept another job right
    /// now? Checked between every job pulled off the queue.
    fn can_process(&self) -> bool {
        true
    }

    async fn process(&self, request: ServiceRequest) -> anyhow::Result<ServiceResponse>;

    /// Called exactly once, before the provider's dispatcher starts pulling
    /// jobs.
    async fn acquire_resources(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called exactly once, after the provider's queue has drained and the
    /// dispatcher has stopped, even if the scoped body returned an error.
    async fn release_resources(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
