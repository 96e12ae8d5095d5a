//! Bounded per-service job queue.
//!
//! A thin wrapper over `tokio::sync::mpsc`, standing in for
//! `asyncio.Queue` in `elm/ords/services/queues.py`. The `oneshot` reply
//! channel plays the role of the Python side's `asyncio.Future`.

use super::{ServiceRequest, ServiceResponse};
use tokio::sync::oneshot;

/// Default queue capacity, matching the original's unbounded `asyncio.Queue`
/// closely enough in practice: callers are expected to be bounded by the
/// number of concurrent location pipelines, which is itself bounded by the
/// orchestrator's semaphore.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;

pub(crate) struct JobEnvelope {
    pub respond_to: oneshot::Sender<anyhow::Result<ServiceResponse>>,
    pub request: ServiceRequest,
}
