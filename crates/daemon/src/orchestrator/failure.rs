use thiserror::Error;

use meme_engine::{ProtocolError, RequestError};

/// Terminal failure of one selection request. The `Display` text is what the
/// user sees; details stay in the fields and the logs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineFailure {
    #[error("Describe your meme idea first.")]
    InvalidPrompt,
    #[error("No templates matched this idea. Try different wording or another mode.")]
    NoCandidates,
    #[error("The model declined to caption this idea. Try rephrasing it.")]
    ModelDeclined { reason: String },
    #[error("The model didn't pick any usable templates. Try again.")]
    NoUsableSelections,
    #[error("Couldn't reach the captioning service. Try again in a moment.")]
    Transport { detail: String },
}

impl PipelineFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineFailure::InvalidPrompt => "invalid_prompt",
            PipelineFailure::NoCandidates => "no_candidates",
            PipelineFailure::ModelDeclined { .. } => "model_declined",
            PipelineFailure::NoUsableSelections => "no_usable_selections",
            PipelineFailure::Transport { .. } => "transport",
        }
    }
}

impl From<RequestError> for PipelineFailure {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::EmptyPrompt => PipelineFailure::InvalidPrompt,
            RequestError::NoCandidates => PipelineFailure::NoCandidates,
        }
    }
}

/// Why one provider attempt produced nothing usable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptFailure {
    Protocol(ProtocolError),
    /// The response decoded but every ordinal was dropped.
    Unresolved,
    /// No provider configured for this slot.
    Disabled,
}

/// Collapse every attempt's failure into the one the user hears about.
///
/// Priority: a refusal, then an answer with nothing usable in it, then a
/// transport error.
pub(crate) fn classify(failures: &[AttemptFailure]) -> PipelineFailure {
    let blocked = failures.iter().find_map(|f| match f {
        AttemptFailure::Protocol(ProtocolError::Blocked(reason)) => Some(reason.clone()),
        _ => None,
    });
    if let Some(reason) = blocked {
        return PipelineFailure::ModelDeclined { reason };
    }

    let answered_badly = failures.iter().any(|f| {
        matches!(
            f,
            AttemptFailure::Unresolved | AttemptFailure::Protocol(ProtocolError::Empty | ProtocolError::Malformed(_))
        )
    });
    if answered_badly {
        return PipelineFailure::NoUsableSelections;
    }

    let detail = failures
        .iter()
        .find_map(|f| match f {
            AttemptFailure::Protocol(ProtocolError::Transport(detail)) => Some(detail.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "no caption provider is configured".to_string());
    PipelineFailure::Transport { detail }
}
