//! The selection contract between this service and a generative model.
//!
//! Models answer with `{"selections": [{"templateOrdinal": 2, "captions": [...]}]}`.
//! Everything decoded here is untrusted until [`crate::reconcile`] has matched
//! the ordinals against the originating request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Name of the single tool structured providers force the model to call.
pub const SELECTION_TOOL_NAME: &str = "select_templates";
pub const SELECTION_TOOL_DESCRIPTION: &str =
    "Record the chosen meme templates, by their number in the list, with captions for each.";

/// Failure of one provider attempt. Each variant is distinguishable so the
/// orchestrator can decide whether to fall back and what to tell the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("model declined the request: {0}")]
    Blocked(String),
    #[error("model returned no selections")]
    Empty,
    #[error("model output failed validation: {0}")]
    Malformed(String),
}

impl ProtocolError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn blocked(msg: impl Into<String>) -> Self {
        Self::Blocked(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Transport(_) => "transport",
            ProtocolError::Blocked(_) => "blocked",
            ProtocolError::Empty => "empty",
            ProtocolError::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Kept as a wide signed integer so an out-of-range model value still
    /// decodes and can be dropped during reconciliation.
    #[serde(alias = "template_ordinal", alias = "templateNumber", alias = "template")]
    pub template_ordinal: i64,
    #[serde(default)]
    pub captions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResponse {
    #[serde(default)]
    pub selections: Vec<Selection>,
}

impl SelectionResponse {
    /// Decode a tool/schema payload.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value).map_err(|e| ProtocolError::malformed(format!("selection payload: {}", e)))
    }

    /// Enforce the shape guarantees that a JSON schema alone does not give us:
    /// at least one selection, and at least one non-blank caption per selection.
    /// Captions are trimmed and blank ones removed.
    pub fn validate(mut self) -> Result<Self, ProtocolError> {
        if self.selections.is_empty() {
            return Err(ProtocolError::Empty);
        }

        for selection in &mut self.selections {
            selection.captions = selection
                .captions
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();

            if selection.captions.is_empty() {
                return Err(ProtocolError::malformed(format!(
                    "selection for template {} has no captions",
                    selection.template_ordinal
                )));
            }
        }

        Ok(self)
    }
}

/// JSON schema for [`SelectionResponse`], used as a tool `input_schema` or a
/// response schema.
pub fn selection_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selections": {
                "type": "array",
                "description": "The chosen templates, best fit first.",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "properties": {
                        "templateOrdinal": {
                            "type": "integer",
                            "description": "The number of the template in the provided list."
                        },
                        "captions": {
                            "type": "array",
                            "description": "Caption options for this template.",
                            "minItems": 1,
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["templateOrdinal", "captions"]
                }
            }
        },
        "required": ["selections"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_and_aliases() {
        let response = SelectionResponse::from_value(json!({
            "selections": [
                { "templateOrdinal": 2, "captions": ["a"] },
                { "template": 3, "captions": ["b", "c"] }
            ]
        }))
        .unwrap();
        assert_eq!(response.selections[0].template_ordinal, 2);
        assert_eq!(response.selections[1].template_ordinal, 3);
        assert_eq!(response.selections[1].captions, vec!["b", "c"]);
    }

    #[test]
    fn wrong_types_are_malformed() {
        let err = SelectionResponse::from_value(json!({
            "selections": [{ "templateOrdinal": "two", "captions": ["a"] }]
        }))
        .unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn validate_rejects_empty_and_captionless() {
        assert_eq!(SelectionResponse::default().validate().unwrap_err(), ProtocolError::Empty);

        let captionless = SelectionResponse {
            selections: vec![Selection { template_ordinal: 1, captions: vec!["  ".into()] }],
        };
        assert_eq!(captionless.validate().unwrap_err().kind(), "malformed");
    }

    #[test]
    fn validate_trims_captions() {
        let response = SelectionResponse {
            selections: vec![Selection {
                template_ordinal: 1,
                captions: vec![" Me ignoring alarms ".into(), "".into(), "My bed".into()],
            }],
        }
        .validate()
        .unwrap();
        assert_eq!(response.selections[0].captions, vec!["Me ignoring alarms", "My bed"]);
    }

    #[test]
    fn schema_requires_ordinal_and_captions() {
        let schema = selection_schema();
        let item = &schema["properties"]["selections"]["items"];
        assert_eq!(item["properties"]["templateOrdinal"]["type"], "integer");
        assert_eq!(item["required"], json!(["templateOrdinal", "captions"]));
    }
}
