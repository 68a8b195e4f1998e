//! Whitelisted modifier attributes and their value checks.

use std::sync::LazyLock;

use regex::Regex;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Modifier names recognized after the marker prefix (`data-cms-<name>`).
pub const MODIFIERS: &[&str] = &[
    "type",
    "label",
    "placeholder",
    "required",
    "validation",
    "options",
    "condition",
    "default",
    "help",
    "min",
    "max",
    "step",
    "accept",
    "multiple",
    "rows",
    "width",
    "readonly",
    "hidden",
    "order",
];

const FLAGS: &[&str] = &["required", "multiple", "readonly", "hidden"];
const UNSIGNED: &[&str] = &["rows", "width"];

pub fn is_modifier(name: &str) -> bool {
    MODIFIERS.contains(&name)
}

/// Boolean modifiers; present without a value they mean `true`.
pub fn is_flag(name: &str) -> bool {
    FLAGS.contains(&name)
}

/// Validate a raw modifier value. `Err` carries a human-readable reason.
pub fn check(name: &str, value: &str) -> Result<(), String> {
    if FLAGS.contains(&name) {
        return parse_flag(value)
            .map(|_| ())
            .ok_or_else(|| format!("`{}` expects true/false, got `{}`", name, value));
    }
    if UNSIGNED.contains(&name) {
        return parse_uint(value)
            .map(|_| ())
            .ok_or_else(|| format!("`{}` expects a non-negative integer, got `{}`", name, value));
    }
    match name {
        "step" => parse_number(value)
            .map(|_| ())
            .ok_or_else(|| format!("`step` expects a number, got `{}`", value)),
        // Dates are the only non-numeric bound.
        "min" | "max" => {
            if parse_number(value).is_some() || DATE_RE.is_match(value.trim()) {
                Ok(())
            } else {
                Err(format!("`{}` expects a number or YYYY-MM-DD date, got `{}`", name, value))
            }
        }
        "order" => value
            .trim()
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| format!("`order` expects an integer, got `{}`", value)),
        _ => Ok(()),
    }
}

/// Attribute present without a value counts as true, like HTML boolean attributes.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn parse_uint(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

/// Strip JSX expression braces and string quotes: `{3}` → `3`, `{"Hero"}` → `Hero`.
pub fn normalize_value(raw: &str) -> String {
    let mut v = raw.trim();
    if let Some(inner) = v.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        v = inner.trim();
    }
    for q in ['"', '\'', '`'] {
        if let Some(inner) = v.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            v = inner;
            break;
        }
    }
    v.to_string()
}

/// `a, b,c` → `["a", "b", "c"]`; empty entries dropped.
pub fn split_options(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Tests ──
