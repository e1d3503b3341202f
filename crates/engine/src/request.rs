use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::template::{Template, TemplateMode};

pub const DEFAULT_AUDIENCE: &str = "general audience";
const NO_INSTRUCTIONS: &str = "No specific instructions";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("prompt text is empty")]
    EmptyPrompt,
    #[error("no candidate templates to choose from")]
    NoCandidates,
}

/// Request-scoped 1-based position of a candidate template.
///
/// This is the only handle a model ever sees for a template. It has no
/// meaning outside the [`SelectionRequest`] that assigned it and is never
/// written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordinal(u32);

impl Ordinal {
    pub fn new(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Ordinal(value))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Interpret a model-supplied integer as an ordinal, if it can be one.
    pub fn from_model(value: i64) -> Option<Self> {
        u32::try_from(value).ok().and_then(Ordinal::new)
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedTemplate {
    pub ordinal: Ordinal,
    pub template: Template,
}

/// One user submission, frozen at build time.
///
/// The candidate ordinals and the instruction text are computed once here and
/// reused unchanged by every provider attempt for this submission.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    prompt_text: String,
    audience: String,
    mode: TemplateMode,
    candidates: Vec<IndexedTemplate>,
    instruction: String,
}

impl SelectionRequest {
    pub fn build(
        prompt_text: &str,
        audience: Option<&str>,
        candidates: Vec<Template>,
        mode: TemplateMode,
    ) -> Result<Self, RequestError> {
        let prompt_text = prompt_text.trim();
        if prompt_text.is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        if candidates.is_empty() {
            return Err(RequestError::NoCandidates);
        }

        let audience = audience
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AUDIENCE)
            .to_string();

        let candidates: Vec<IndexedTemplate> = candidates
            .into_iter()
            .zip(1u32..)
            .map(|(template, position)| IndexedTemplate {
                ordinal: Ordinal(position),
                template,
            })
            .collect();

        let instruction = render_instruction(prompt_text, &audience, mode, &candidates);

        Ok(SelectionRequest {
            prompt_text: prompt_text.to_string(),
            audience,
            mode,
            candidates,
            instruction,
        })
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn mode(&self) -> TemplateMode {
        self.mode
    }

    pub fn candidates(&self) -> &[IndexedTemplate] {
        &self.candidates
    }

    /// The instruction payload handed to every provider.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Exact lookup of an ordinal against this request's candidates.
    pub fn lookup(&self, ordinal: Ordinal) -> Option<&Template> {
        self.candidates
            .get(ordinal.get() as usize - 1)
            .filter(|c| c.ordinal == ordinal)
            .map(|c| &c.template)
    }
}

/// Serialize candidates as numbered entries, one block per template.
pub fn render_candidate_list(candidates: &[IndexedTemplate]) -> String {
    candidates
        .iter()
        .map(|c| {
            let instructions = c.template.instructions.trim();
            let instructions = if instructions.is_empty() {
                NO_INSTRUCTIONS
            } else {
                instructions
            };
            format!("{}. {}\nInstructions: {}", c.ordinal, c.template.name, instructions)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_instruction(
    prompt_text: &str,
    audience: &str,
    mode: TemplateMode,
    candidates: &[IndexedTemplate],
) -> String {
    let mode_note = match mode {
        TemplateMode::Greenscreen => {
            "\nThese are greenscreen templates: the user's own footage is keyed in behind the subject, so captions should set up that footage.\n"
        }
        TemplateMode::Standard => "",
    };

    format!(
        "You are helping a user turn an idea into meme videos.\n\
         \n\
         Idea: {prompt_text}\n\
         Audience: {audience}\n\
         {mode_note}\n\
         Available templates:\n\
         {list}\n\
         \n\
         Choose the templates that fit the idea best (at most 5) and write 2 to 3 short captions for each one, \
         following each template's instructions. Refer to a template only by its number from the list above.",
        list = render_candidate_list(candidates),
    )
}
