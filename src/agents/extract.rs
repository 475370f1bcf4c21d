//! Best-effort parsing of free-form model replies.
//!
//! None of these are contracts: callers keep the raw text whenever extraction
//! comes back empty.

use std::sync::LazyLock;

use regex::Regex;

use crate::agents::agent::OutputShape;
use crate::error::{AppError, ErrorCode};
use crate::models::PromptSections;

pub const PREVIEW_CHARS: usize = 200;

const SECTION_NAMES: [&str; 3] = ["planning", "final_prompt", "considerations"];

static TAGGED_SECTIONS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SECTION_NAMES
        .iter()
        .filter_map(|name| {
            Regex::new(&format!(r"(?si)<{name}>\s*(.*?)\s*</{name}>"))
                .ok()
                .map(|re| (*name, re))
        })
        .collect()
});

static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*)?[ \t]*(final[ _]prompt|planning|considerations)[ \t]*(?:\*\*)?[ \t]*:?[ \t]*(?:\*\*)?[ \t]*$")
        .expect("section heading regex")
});

/// First `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Preview line content for the orchestration results log.
///
/// Text at or under [`PREVIEW_CHARS`] is returned untouched; longer text is cut
/// to exactly that many characters and marked with `...`.
pub fn preview(text: &str) -> String {
    let cut = truncate_chars(text, PREVIEW_CHARS);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    }
}

/// Span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Decodes a reply against `shape`.
///
/// `structured` replies were schema-enforced by the provider and are decoded
/// whole first; everything else goes through [`extract_json_object`].
pub fn decode_shape(shape: OutputShape, text: &str, structured: bool) -> Result<String, AppError> {
    if structured {
        if let Ok(decoded) = shape.decode(text.trim()) {
            return Ok(decoded);
        }
    }

    let json = extract_json_object(text).ok_or_else(|| {
        AppError::new(
            ErrorCode::OutputShapeMismatch,
            format!("no JSON object found for {}", shape),
        )
    })?;

    shape.decode(json).map_err(|e| {
        AppError::new(
            ErrorCode::OutputShapeMismatch,
            format!("could not decode {}: {}", shape, e),
        )
    })
}

/// Pulls `planning`, `final_prompt` and `considerations` out of a reply.
///
/// Tries a JSON object first, then `<name>...</name>` tags, then markdown
/// headings. Returns empty sections when none of these match.
pub fn extract_sections(text: &str) -> PromptSections {
    if let Some(sections) = sections_from_json(text) {
        return sections;
    }

    let tagged = sections_from_tags(text);
    if !tagged.is_empty() {
        return tagged;
    }

    sections_from_headings(text)
}

fn sections_from_json(text: &str) -> Option<PromptSections> {
    let json = extract_json_object(text)?;
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let sections = PromptSections {
        planning: field("planning"),
        final_prompt: field("final_prompt"),
        considerations: field("considerations"),
    };
    (!sections.is_empty()).then_some(sections)
}

fn sections_from_tags(text: &str) -> PromptSections {
    let mut sections = PromptSections::default();
    for (name, re) in TAGGED_SECTIONS.iter() {
        let found = re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        set_section(&mut sections, name, found);
    }
    sections
}

fn sections_from_headings(text: &str) -> PromptSections {
    let headings: Vec<(String, usize, usize)> = SECTION_HEADING
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let name = c.get(1)?.as_str().to_lowercase().replace(' ', "_");
            Some((name, whole.start(), whole.end()))
        })
        .collect();

    let mut sections = PromptSections::default();
    for (i, (name, _, body_start)) in headings.iter().enumerate() {
        let body_end = headings.get(i + 1).map(|(_, start, _)| *start).unwrap_or(text.len());
        let body = text[*body_start..body_end].trim();
        if !body.is_empty() {
            set_section(&mut sections, name, Some(body.to_string()));
        }
    }
    sections
}

fn set_section(sections: &mut PromptSections, name: &str, value: Option<String>) {
    let slot = match name {
        "planning" => &mut sections.planning,
        "final_prompt" => &mut sections.final_prompt,
        "considerations" => &mut sections.considerations,
        _ => return,
    };
    if slot.is_none() {
        *slot = value;
    }
}
