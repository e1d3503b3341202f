//! Best-effort recovery of a [`SelectionResponse`] from free-form model text.
//!
//! Used only on the fallback pathway, where the model is asked for JSON but
//! nothing enforces it. Strategies are tried in order and the first one that
//! yields selections wins:
//!
//! 1. the whole text as JSON
//! 2. fenced code blocks (```` ```json ````)
//! 3. balanced `{...}` objects carrying a `selections` key
//! 4. balanced `[...]` arrays of selection objects
//! 5. numbered prose, e.g.
//!    ```text
//!    Template 2: Distracted Boyfriend
//!    - "Me ignoring alarms"
//!    - "My bed on a Monday"
//!    ```

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::response::{ProtocolError, Selection, SelectionResponse};

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").expect("fence pattern is valid"));

static TEMPLATE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s*_#]*template\s*(?:#|no\.?|number)?\s*(\d{1,4})\b").expect("template header pattern is valid")
});

// Unindented "2. Name", "**2)**", "## 2:" or "#2." lines.
static NUMBERED_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[*_]{1,2}|#{1,3} )?#?(\d{1,4})[.):]").expect("numbered header pattern is valid")
});

static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d{1,2}[.)]\s+(.+)$|^\s*[-*•]\s+(.+)$").expect("bullet pattern is valid")
});

// `1. "caption"` under an open header is a caption, not the next template.
static NUMBERED_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*\d{1,2}[.)]\s+["\u{201c}]"#).expect("numbered quote pattern is valid"));

static CAPTION_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\*\*)?caption\s*\d*\s*(?:\*\*)?\s*[:\-]\s*").expect("label pattern is valid"));

pub fn extract_selections(text: &str) -> Result<SelectionResponse, ProtocolError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if let Some(response) = parse_json(text) {
        return Ok(response);
    }

    for block in FENCE.captures_iter(text) {
        if let Some(response) = block.get(1).and_then(|m| parse_json(m.as_str())) {
            return Ok(response);
        }
    }

    for span in balanced_spans(text, '{', '}') {
        if let Some(response) = parse_json(span) {
            return Ok(response);
        }
    }

    for span in balanced_spans(text, '[', ']') {
        if let Some(response) = parse_json(span) {
            return Ok(response);
        }
    }

    let selections = parse_numbered_prose(text);
    if selections.is_empty() {
        return Err(ProtocolError::malformed("no selections found in model text"));
    }
    Ok(SelectionResponse { selections })
}

fn parse_json(text: &str) -> Option<SelectionResponse> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    match value {
        Value::Object(map) if map.contains_key("selections") => serde_json::from_value(Value::Object(map)).ok(),
        Value::Array(items) if !items.is_empty() => serde_json::from_value::<Vec<Selection>>(Value::Array(items))
            .ok()
            .map(|selections| SelectionResponse { selections }),
        _ => None,
    }
}

/// Top-level spans delimited by `open`/`close`, skipping delimiters inside
/// JSON string literals.
fn balanced_spans(text: &str, open: char, close: char) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = Some(i);
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(s) = start.take() {
                    spans.push(&text[s..i + ch.len_utf8()]);
                }
            }
        }
    }

    spans
}

fn parse_numbered_prose(text: &str) -> Vec<Selection> {
    let mut selections = Vec::new();
    let mut current: Option<Selection> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let quoted_item = current.is_some() && NUMBERED_QUOTE.is_match(line);
        if let Some(ordinal) = header_ordinal(line).filter(|_| !quoted_item) {
            if let Some(done) = current.take() {
                selections.push(done);
            }
            current = Some(Selection {
                template_ordinal: ordinal,
                captions: Vec::new(),
            });
            continue;
        }

        if let (Some(selection), Some(caption)) = (current.as_mut(), caption_text(line)) {
            selection.captions.push(caption);
        }
    }

    if let Some(done) = current.take() {
        selections.push(done);
    }

    selections.retain(|s| !s.captions.is_empty());
    selections
}

fn header_ordinal(line: &str) -> Option<i64> {
    TEMPLATE_HEADER
        .captures(line)
        .or_else(|| NUMBERED_HEADER.captures(line))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn caption_text(line: &str) -> Option<String> {
    let body = match BULLET.captures(line) {
        Some(c) => c.get(1).or_else(|| c.get(2))?.as_str(),
        None => {
            let trimmed = line.trim();
            if is_quoted(trimmed) || CAPTION_LABEL.is_match(trimmed) {
                trimmed
            } else {
                return None;
            }
        }
    };

    let body = CAPTION_LABEL.replace(body.trim(), "");
    let caption = body
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\u{201c}' | '\u{201d}' | '*'))
        .trim();

    if caption.is_empty() {
        None
    } else {
        Some(caption.to_string())
    }
}

fn is_quoted(s: &str) -> bool {
    (s.starts_with('"') || s.starts_with('\u{201c}')) && (s.ends_with('"') || s.ends_with('\u{201d}')) && s.chars().count() > 1
}
