//! Error taxonomy for the extraction pipeline.
//!
//! Most call sites use `anyhow::Result` (matching RKnowledge's convention
//! throughout `config.rs` and `cli/commands/*.rs`), but a handful
//! of error kinds are enumerable and get matched on by callers (the
//! structured parser treats a tree-traversal error as "feature not found",
//! the service provider treats a missing dispatcher as fatal programmer
//! error). Those live here as a `thiserror` enum.

use thiserror::Error;

/// Errors raised by the service runtime and decision-tree engine.
#[derive(Debug, Error)]
pub enum OrdsError {
    /// A caller invoked `ServiceProvider::call` for a service with no
    /// registered dispatcher (i.e. outside the provider's scope).
    #[error(
        "service {0:?} is not initialized; calls must happen inside a \
         ServiceProvider scope that registers it"
    )]
    ServiceNotInitialized(String),

    /// The decision graph traversal could not proceed: either no edge
    /// condition was satisfied, or the graph was malformed (multiple
    /// unconditioned outgoing edges).
    #[error("graph traversal failed at node {node:?}: {reason}\nlast reply: {last_reply}")]
    GraphTraversalError {
        node: String,
        reason: String,
        last_reply: String,
    },

    /// Retries against the LLM service were exhausted.
    #[error("exhausted {retries} retries calling the LLM service: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The LLM provider returned a non-retryable bad-request-class error.
    /// This is not necessarily surfaced as an `Err` to callers (decision-tree
    /// traversal treats it as `None` without retrying), but the variant
    /// exists so collaborators can distinguish it explicitly if needed.
    #[error("unrecoverable LLM error: {0}")]
    UnrecoverableLlm(String),

    /// A required configuration value was missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}
