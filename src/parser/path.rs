use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::PathError;

/// Segment marking a repeater section; the segments after it name the per-item field.
pub const REPEATER_TOKEN: &str = "$";

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPath {
    pub page_slug: String,
    pub section_slug: String,
    pub field_segments: Vec<String>,
    pub is_repeater: bool,
}

impl ParsedPath {
    /// `page.section`, the key sections are grouped under.
    pub fn section_key(&self) -> (String, String) {
        (self.page_slug.clone(), self.section_slug.clone())
    }

    /// True when the marker declares the section itself rather than a field in it.
    pub fn is_section_root(&self) -> bool {
        self.field_segments.is_empty()
    }

    /// Last field segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.field_segments.last().map(String::as_str)
    }
}

impl fmt::Display for ParsedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&build(self))
    }
}

/// Parse a dotted marker path.
///
/// The placeholder may appear anywhere after the section segment; it is dropped
/// from `field_segments` and recorded as `is_repeater`.
pub fn parse(path: &str) -> Result<ParsedPath, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let segments: Vec<&str> = trimmed.split('.').collect();
    if segments.len() < 2 {
        return Err(PathError::TooFewSegments {
            path: trimmed.to_string(),
        });
    }

    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            return Err(PathError::EmptySegment {
                path: trimmed.to_string(),
                index: i,
            });
        }
        if *seg == REPEATER_TOKEN {
            if i < 2 {
                return Err(PathError::MisplacedPlaceholder {
                    path: trimmed.to_string(),
                });
            }
            continue;
        }
        if !SEGMENT_RE.is_match(seg) {
            return Err(PathError::InvalidSegment {
                path: trimmed.to_string(),
                segment: seg.to_string(),
            });
        }
    }

    let is_repeater = segments[2..].iter().any(|s| *s == REPEATER_TOKEN);
    let field_segments = segments[2..]
        .iter()
        .filter(|s| **s != REPEATER_TOKEN)
        .map(|s| s.to_string())
        .collect();

    Ok(ParsedPath {
        page_slug: segments[0].to_string(),
        section_slug: segments[1].to_string(),
        field_segments,
        is_repeater,
    })
}

/// Inverse of [`parse`]. Repeater paths place the placeholder right after the section.
pub fn build(parsed: &ParsedPath) -> String {
    let mut parts: Vec<&str> = vec![&parsed.page_slug, &parsed.section_slug];
    if parsed.is_repeater {
        parts.push(REPEATER_TOKEN);
    }
    parts.extend(parsed.field_segments.iter().map(String::as_str));
    parts.join(".")
}

/// Canonical spelling of a path, used as the field identity.
pub fn canonical(path: &str) -> Result<String, PathError> {
    parse(path).map(|p| build(&p))
}

pub fn is_repeater_path(path: &str) -> bool {
    path.split('.').any(|s| s.trim() == REPEATER_TOKEN)
}

// ── Tests ──
