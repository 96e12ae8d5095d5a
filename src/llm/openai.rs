//! OpenAI Chat Completions API client.
//!
//! Adapted from RKnowledge's `llm::openai::OpenAIProvider`: same
//! request-building and error-handling shape, generalized from a fixed
//! system+user relation-extraction turn into an arbitrary multi-message
//! chat transcript, and extended to read back token usage (the original
//! provider discarded it).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BadRequestError, ChatCompletion, ChatMessage, LlmClient, Usage};

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("OpenAI API key is required. Set OPENAI_API_KEY environment variable.");
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, messages: &[ChatMessage], model: &str) -> Result<ChatCompletion> {
        anyhow::ensure!(!messages.is_empty(), "chat requires at least one message");

        let wire: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let request = OpenAiRequest {
            model,
            messages: wire,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(BadRequestError(format!("{status}: {error_text}")).into());
            }
            anyhow::bail!("OpenAI API error ({status}): {error_text}");
        }

        let response: OpenAiResponse = response
            .json()
            .await
            .context("failed to parse OpenAI response")?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .context("no content in OpenAI response")?;

        let usage = response.usage.unwrap_or_default();

        Ok(ChatCompletion {
            content,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
