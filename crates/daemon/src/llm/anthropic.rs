//! Anthropic Messages API with a single forced tool call.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use meme_engine::response::{selection_schema, SELECTION_TOOL_DESCRIPTION, SELECTION_TOOL_NAME};
use meme_engine::{ProtocolError, SelectionRequest, SelectionResponse};

use crate::config::ProviderConfig;
use crate::llm::{build_http_client, status_error, transport_error, CaptionProvider, MAX_OUTPUT_TOKENS, SYSTEM_PROMPT};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    tools: Vec<Tool>,
    tool_choice: ToolChoice,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

#[derive(Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },
    #[serde(other)]
    Other,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        Ok(AnthropicProvider {
            client: build_http_client(timeout)?,
            config,
        })
    }
}

#[async_trait::async_trait]
impl CaptionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_structured(&self) -> bool {
        true
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        model: Option<&str>,
    ) -> Result<SelectionResponse, ProtocolError> {
        let model = model.unwrap_or(self.config.model.as_str());
        let body = MessagesRequest {
            model,
            max_tokens: MAX_OUTPUT_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: request.instruction(),
            }],
            tools: vec![Tool {
                name: SELECTION_TOOL_NAME,
                description: SELECTION_TOOL_DESCRIPTION,
                input_schema: selection_schema(),
            }],
            tool_choice: ToolChoice {
                kind: "tool",
                name: SELECTION_TOOL_NAME,
            },
        };

        debug!(model, candidates = request.candidates().len(), "calling anthropic");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }

        let message: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProtocolError::malformed(format!("anthropic response body: {}", e)))?;

        if message.stop_reason.as_deref() == Some("refusal") {
            let explanation = message
                .content
                .iter()
                .find_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "refusal".to_string());
            return Err(ProtocolError::blocked(explanation));
        }

        let input = message
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { name, input } if name == SELECTION_TOOL_NAME => Some(input),
                _ => None,
            })
            .ok_or_else(|| ProtocolError::malformed("anthropic response has no select_templates tool call"))?;

        SelectionResponse::from_value(input)?.validate()
    }
}
