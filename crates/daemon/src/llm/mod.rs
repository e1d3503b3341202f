//! Captioning providers: the model-facing half of template selection.
//!
//! Every provider answers the same question (which of these numbered
//! templates fit the idea, and what captions go with them) behind one trait,
//! so the orchestrator's fallback logic is written once. Structured providers
//! constrain the model with a schema; the free-text provider asks nicely and
//! recovers the answer with [`meme_engine::extract`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use meme_engine::{ProtocolError, SelectionRequest, SelectionResponse};

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::ChatCompletionProvider;

pub(crate) const SYSTEM_PROMPT: &str =
    "You pick meme video templates for a user's idea and write short, punchy captions for them. \
     Captions are on-screen text: no hashtags, no emoji spam, under 80 characters each.";

pub(crate) const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Which structured provider handles the primary attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelChoice {
    #[default]
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "gemini")]
    Gemini,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelChoice::Claude => "claude",
            ModelChoice::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" | "" => Ok(ModelChoice::Claude),
            "gemini" | "google" => Ok(ModelChoice::Gemini),
            other => Err(format!("unknown model choice: {}", other)),
        }
    }
}

/// One way of asking a model to choose and caption templates.
#[async_trait::async_trait]
pub trait CaptionProvider: Send + Sync {
    /// Short provider label for logs.
    fn name(&self) -> &str;

    /// Whether the provider's output is schema-constrained.
    fn is_structured(&self) -> bool;

    /// A single request/response round trip. No retries.
    ///
    /// `model` overrides the provider's configured model id.
    async fn select(
        &self,
        request: &SelectionRequest,
        model: Option<&str>,
    ) -> Result<SelectionResponse, ProtocolError>;
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()?)
}

pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> ProtocolError {
    if e.is_timeout() {
        ProtocolError::transport(format!("{} request timed out", provider))
    } else {
        ProtocolError::transport(format!("{} request failed: {}", provider, e))
    }
}

/// Turn a non-2xx response into a transport failure carrying status and body.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> ProtocolError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    ProtocolError::transport(format!("{} returned {}: {}", provider, status, error_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_choice_parses_vendor_aliases() {
        assert_eq!("Anthropic".parse(), Ok(ModelChoice::Claude));
        assert_eq!("gemini".parse(), Ok(ModelChoice::Gemini));
        assert_eq!("".parse(), Ok(ModelChoice::Claude));
        assert!("llama".parse::<ModelChoice>().is_err());
    }

    #[test]
    fn model_choice_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ModelChoice::Gemini).unwrap(), "gemini");
    }
}
