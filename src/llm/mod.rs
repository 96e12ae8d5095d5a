//! LLM collaborator contract and callers.
//!
//! `LlmClient` is the external-collaborator boundary (analogous to
//! `SearchEngine`/`FileLoader`): the crate depends on the trait, not on any
//! one vendor. [`anthropic::AnthropicClient`] is kept as a concrete,
//! ready-to-use implementation adapted from RKnowledge's
//! `llm::anthropic::AnthropicProvider`, generalized from one-shot relation
//! extraction to multi-turn chat completion.

mod anthropic;
pub mod caller;
pub mod json;
mod openai;

pub use anthropic::AnthropicClient;
pub use caller::{ChatLlmCaller, StructuredLlmCaller};
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Token accounting for a single completion, used to feed both the
/// sliding-window rate tracker and the per-location usage record.
/// Grounded on `elm/ords/services/openai.py::usage_from_response`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Usage,
}

/// The vendor-agnostic chat completion contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], model: &str) -> anyhow::Result<ChatCompletion>;

    fn name(&self) -> &'static str;
}

/// A provider error class that should never be retried — the request
/// itself was malformed, so retrying it would just waste the rate-limit
/// budget on another guaranteed failure. Mirrors the original's special
/// handling of `openai.BadRequestError`.
#[derive(Debug, thiserror::Error)]
#[error("bad request: {0}")]
pub struct BadRequestError(pub String);

/// Counts tokens for a framed message list, replicating
/// `elm/ords/services/openai.py::count_tokens`'s `+4` per-message and `+3`
/// overall framing overhead on top of a raw per-string count.
pub fn count_framed_tokens(messages: &[ChatMessage], tokenizer: &dyn crate::chunk::Tokenizer) -> usize {
    let body: usize = messages.iter().map(|m| tokenizer.count(&m.content) + 4).sum();
    body + 3
}
