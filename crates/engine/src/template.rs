use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which slice of the corpus a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TemplateMode {
    #[serde(rename = "greenscreen")]
    Greenscreen,
    #[default]
    #[serde(rename = "standard")]
    Standard,
}

impl TemplateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateMode::Greenscreen => "greenscreen",
            TemplateMode::Standard => "standard",
        }
    }

    /// Whether a template with the given greenscreen flag belongs to this mode.
    pub fn admits(&self, greenscreen: bool) -> bool {
        match self {
            TemplateMode::Greenscreen => greenscreen,
            TemplateMode::Standard => !greenscreen,
        }
    }
}

impl fmt::Display for TemplateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greenscreen" | "green_screen" => Ok(TemplateMode::Greenscreen),
            "standard" | "" => Ok(TemplateMode::Standard),
            other => Err(format!("unknown template mode: {}", other)),
        }
    }
}

/// A stored short video plus the free-text instructions describing how it is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    pub video_url: String,
    #[serde(default)]
    pub greenscreen: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Template {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, video_url: impl Into<String>) -> Self {
        Template {
            id: Uuid::new_v4(),
            name: name.into(),
            instructions: instructions.into(),
            video_url: video_url.into(),
            greenscreen: false,
            embedding: Vec::new(),
        }
    }

    pub fn with_greenscreen(mut self, greenscreen: bool) -> Self {
        self.greenscreen = greenscreen;
        self
    }
}
