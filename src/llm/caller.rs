//! Structured and chat LLM callers.
//!
//! Grounded on `elm/ords/utilities/parsing.py::StructuredLLMCaller` (the
//! JSON-mode wrapper) and `ChatLlmCaller`, a growing-transcript wrapper used
//! by the decision tree, not present as a separate class in the original —
//! the original's `DecisionTree` manages `self.messages` inline; splitting
//! it into its own caller keeps the transcript-branching logic
//! (`snapshot`/`restore`) testable in isolation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use super::json::{add_json_instructions_if_needed, llm_response_as_json};
use super::ChatMessage;
use crate::service::{ServiceProvider, ServiceRequest};
use crate::usage::UsageTracker;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Calls the LLM service and parses each reply as JSON, adding the
/// "respond in JSON" instruction to the system message if it's missing.
pub struct StructuredLlmCaller {
    provider: Arc<ServiceProvider>,
    service_name: &'static str,
    model: String,
    usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
}

impl StructuredLlmCaller {
    pub fn new(
        provider: Arc<ServiceProvider>,
        service_name: &'static str,
        model: impl Into<String>,
        usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
    ) -> Self {
        Self {
            provider,
            service_name,
            model: model.into(),
            usage_tracker,
        }
    }

    /// Submit a one-shot system+user exchange and parse the reply as JSON.
    /// An empty or ignored reply parses to an empty object, never an error.
    pub async fn call(&self, sys_msg: &str, content: &str) -> anyhow::Result<Value> {
        self.call_labeled(sys_msg, content, None).await
    }

    pub async fn call_labeled(
        &self,
        sys_msg: &str,
        content: &str,
        usage_sub_label: Option<&str>,
    ) -> anyhow::Result<Value> {
        let sys_msg = add_json_instructions_if_needed(sys_msg);
        let messages = vec![ChatMessage::system(sys_msg), ChatMessage::user(content)];

        let reply = self
            .provider
            .call(
                self.service_name,
                ServiceRequest::Llm {
                    messages,
                    model: self.model.clone(),
                    usage_tracker: self.usage_tracker.clone(),
                    usage_sub_label: usage_sub_label.map(str::to_string),
                    timeout: DEFAULT_TIMEOUT,
                },
            )
            .await?
            .into_llm()?;

        Ok(match reply {
            Some(text) if !text.is_empty() => llm_response_as_json(&text),
            _ => Value::Object(serde_json::Map::new()),
        })
    }
}

/// Owns a growing chat transcript, seeded with a system message. Used by
/// the decision tree to carry conversation state across nodes.
#[derive(Clone)]
pub struct ChatLlmCaller {
    provider: Arc<ServiceProvider>,
    service_name: &'static str,
    model: String,
    usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
    messages: Vec<ChatMessage>,
}

impl ChatLlmCaller {
    pub fn new(
        provider: Arc<ServiceProvider>,
        service_name: &'static str,
        model: impl Into<String>,
        system_message: impl Into<String>,
        usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
    ) -> Self {
        Self {
            provider,
            service_name,
            model: model.into(),
            usage_tracker,
            messages: vec![ChatMessage::system(system_message)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Append `content` as a user turn, submit the whole transcript, append
    /// the reply as an assistant turn, and return it.
    pub async fn call(&mut self, content: impl Into<String>) -> anyhow::Result<String> {
        self.messages.push(ChatMessage::user(content));

        let reply = self
            .provider
            .call(
                self.service_name,
                ServiceRequest::Llm {
                    messages: self.messages.clone(),
                    model: self.model.clone(),
                    usage_tracker: self.usage_tracker.clone(),
                    usage_sub_label: None,
                    timeout: DEFAULT_TIMEOUT,
                },
            )
            .await?
            .into_llm()?
            .unwrap_or_default();

        self.messages.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }

    /// Deep-clone the current transcript state so callers can branch a
    /// conversation (e.g. the decision tree trying an alternate node) and
    /// later `restore` back to this point.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn restore(&mut self, snapshot: Vec<ChatMessage>) {
        self.messages = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Service, ServiceResponse};
    use async_trait::async_trait;

    struct StubLlm;

    #[async_trait]
    impl Service for StubLlm {
        fn name(&self) -> &'static str {
            "llm"
        }

        async fn process(&self, request: ServiceRequest) -> anyhow::Result<ServiceResponse> {
            match request {
                ServiceRequest::Llm { messages, .. } => {
                    let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
                    Ok(ServiceResponse::Llm(Some(format!(
                        "```json\n{{\"echo\": \"{last}\"}}\n```"
                    ))))
                }
                _ => anyhow::bail!("unsupported"),
            }
        }
    }

    #[tokio::test]
    async fn structured_caller_parses_fenced_json() {
        let result = ServiceProvider::scoped(vec![Arc::new(StubLlm)], |provider| async move {
            let caller = StructuredLlmCaller::new(provider, "llm", "test-model", None);
            let value = caller.call("Classify this.", "hello").await?;
            assert_eq!(value["echo"], "hello");
            Ok(())
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn chat_caller_appends_turns_and_supports_branching() {
        let result = ServiceProvider::scoped(vec![Arc::new(StubLlm)], |provider| async move {
            let mut chat = ChatLlmCaller::new(provider, "llm", "test-model", "You are helpful.", None);
            chat.call("first").await?;
            let checkpoint = chat.snapshot();

            chat.call("second").await?;
            assert_eq!(chat.messages().len(), 5); // system + 2 user + 2 assistant

            chat.restore(checkpoint);
            assert_eq!(chat.messages().len(), 3); // system + 1 user + 1 assistant
            Ok(())
        })
        .await;
        assert!(result.is_ok());
    }
}
