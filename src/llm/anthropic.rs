//! Anthropic Messages API client.
//!
//! Adapted from `llm::anthropic::AnthropicProvider` in the RKnowledge crate:
//! same request-building and error-handling shape, generalized from a
//! single system+user turn fixed to relation extraction into an arbitrary
//! multi-message chat transcript, and extended to read back token usage
//! (the original provider discarded it).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BadRequestError, ChatCompletion, ChatMessage, LlmClient, Usage};

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

const DEFAULT_MAX_TOKENS: u32 = 4096;

impl AnthropicClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!(
                "Anthropic API key is required. Set ANTHROPIC_API_KEY environment variable."
            );
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.anthropic.com")
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, messages: &[ChatMessage], model: &str) -> Result<ChatCompletion> {
        // Anthropic takes the system prompt out-of-band; fold any leading
        // "system" message into the top-level field and pass the rest
        // through as the conversation.
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str());
        let turns: Vec<WireMessage> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();
        anyhow::ensure!(!turns.is_empty(), "chat requires at least one non-system message");

        let request = AnthropicRequest {
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            system,
            messages: turns,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(BadRequestError(format!("{status}: {error_text}")).into());
            }
            anyhow::bail!("Anthropic API error ({status}): {error_text}");
        }

        let response: AnthropicResponse = response
            .json()
            .await
            .context("failed to parse Anthropic response")?;

        let content = response
            .content
            .first()
            .and_then(|c| c.text.clone())
            .context("no text content in Anthropic response")?;

        Ok(ChatCompletion {
            content,
            usage: Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
            },
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
