//! OpenAI-compatible chat completions, read as free text.
//!
//! This is the fallback pathway: the model is asked for JSON but nothing
//! enforces it, so the reply goes through the best-effort extractor.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use meme_engine::extract::extract_selections;
use meme_engine::{ProtocolError, SelectionRequest, SelectionResponse};

use crate::config::ProviderConfig;
use crate::llm::{build_http_client, status_error, transport_error, CaptionProvider, MAX_OUTPUT_TOKENS, SYSTEM_PROMPT};

const FORMAT_HINT: &str = "Respond with JSON only, shaped like \
{\"selections\": [{\"templateOrdinal\": 1, \"captions\": [\"caption\"]}]}. \
templateOrdinal is the number shown next to the template above.";

pub struct ChatCompletionProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl ChatCompletionProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        Ok(ChatCompletionProvider {
            client: build_http_client(timeout)?,
            config,
        })
    }
}

#[async_trait::async_trait]
impl CaptionProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_structured(&self) -> bool {
        false
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        model: Option<&str>,
    ) -> Result<SelectionResponse, ProtocolError> {
        let model = model.unwrap_or(self.config.model.as_str());
        let body = ChatRequest {
            model,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("{}\n\n{}", request.instruction(), FORMAT_HINT),
                },
            ],
        };

        debug!(model, candidates = request.candidates().len(), "calling chat completions");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        if !response.status().is_success() {
            return Err(status_error("openai", response).await);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProtocolError::malformed(format!("openai response body: {}", e)))?;

        let choice = chat.choices.into_iter().next().ok_or(ProtocolError::Empty)?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProtocolError::blocked("content_filter"));
        }

        let message = choice.message.ok_or(ProtocolError::Empty)?;
        if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(ProtocolError::blocked(refusal));
        }

        let text = message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        extract_selections(&text)?.validate()
    }
}
