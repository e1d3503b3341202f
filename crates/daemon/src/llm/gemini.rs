//! Gemini `generateContent` with a JSON response schema.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use meme_engine::response::selection_schema;
use meme_engine::{ProtocolError, SelectionRequest, SelectionResponse};

use crate::config::ProviderConfig;
use crate::llm::{build_http_client, status_error, transport_error, CaptionProvider, MAX_OUTPUT_TOKENS, SYSTEM_PROMPT};

/// Finish reasons that mean the safety system stopped the answer.
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

pub struct GeminiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    #[serde(rename = "responseSchema")]
    response_schema: Value,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        Ok(GeminiProvider {
            client: build_http_client(timeout)?,
            config,
        })
    }
}

/// Gemini's schema dialect spells types in upper case.
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let converted: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(kind)) => Value::String(kind.to_ascii_uppercase()),
                        _ => to_gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait::async_trait]
impl CaptionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
        let body = GeminiRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: request.instruction().to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: to_gemini_schema(&selection_schema()),
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        debug!(model, candidates = request.candidates().len(), "calling gemini");

        let response = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.config.base_url, model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("gemini", e))?;

        if !response.status().is_success() {
            return Err(status_error("gemini", response).await);
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProtocolError::malformed(format!("gemini response body: {}", e)))?;

        if let Some(reason) = gemini_response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProtocolError::blocked(format!("prompt blocked: {}", reason)));
        }

        let candidate = gemini_response.candidates.into_iter().next().ok_or(ProtocolError::Empty)?;

        if let Some(reason) = candidate
            .finish_reason
            .as_deref()
            .filter(|r| BLOCKING_FINISH_REASONS.contains(r))
        {
            return Err(ProtocolError::blocked(format!("response blocked: {}", reason)));
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| ProtocolError::malformed(format!("gemini returned invalid JSON: {}", e)))?;

        SelectionResponse::from_value(value)?.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meme_engine::{Template, TemplateMode};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> SelectionRequest {
        SelectionRequest::build(
            "monday mornings",
            Some("students"),
            vec![
                Template::new("Drake", "", "https://cdn.example/drake.mp4"),
                Template::new("Distracted Boyfriend", "", "https://cdn.example/boyfriend.mp4"),
            ],
            TemplateMode::Standard,
        )
        .unwrap()
    }

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(
            ProviderConfig {
                api_key: "g-key".to_string(),
                base_url: server.uri(),
                model: "gemini-test".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn text_response(text: &str, finish_reason: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": finish_reason
            }]
        }))
    }

    #[test]
    fn schema_types_are_upper_cased() {
        let schema = to_gemini_schema(&selection_schema());
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["selections"]["type"], "ARRAY");
        assert_eq!(schema["properties"]["selections"]["items"]["properties"]["templateOrdinal"]["type"], "INTEGER");
        assert_eq!(schema["required"], json!(["selections"]));
    }

    #[tokio::test]
    async fn sends_response_schema_and_decodes_json_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json", "responseSchema": { "type": "OBJECT" } }
            })))
            .respond_with(text_response(
                r#"{"selections":[{"templateOrdinal":1,"captions":["When the alarm rings"]}]}"#,
                "STOP",
            ))
            .mount(&server)
            .await;

        let response = provider(&server).select(&request(), None).await.unwrap();
        assert_eq!(response.selections[0].template_ordinal, 1);
        assert_eq!(response.selections[0].captions, vec!["When the alarm rings"]);
    }

    #[tokio::test]
    async fn prompt_feedback_block_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let err = provider(&server).select(&request(), None).await.unwrap_err();
        assert_eq!(err.kind(), "blocked");
    }

    #[tokio::test]
    async fn safety_finish_reason_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(text_response("", "SAFETY"))
            .mount(&server)
            .await;

        let err = provider(&server).select(&request(), None).await.unwrap_err();
        assert_eq!(err.kind(), "blocked");
    }

    #[tokio::test]
    async fn non_json_text_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(text_response("Template 1 works.", "STOP"))
            .mount(&server)
            .await;

        let err = provider(&server).select(&request(), None).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn no_candidates_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = provider(&server).select(&request(), None).await.unwrap_err();
        assert_eq!(err, ProtocolError::Empty);
    }
}
