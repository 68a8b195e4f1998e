use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::parser::modifiers::{parse_flag, parse_number, parse_uint, split_options};

/// Field type plus the configuration valid for that type.
///
/// Serialized adjacently tagged: `{"type": "number", "config": {"min": 0}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum FieldKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    Textarea {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    Richtext {},
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    Boolean {},
    Date {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<String>,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accept: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "is_false")]
        multiple: bool,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accept: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        multiple: bool,
    },
    Url {},
    Email {},
    Color {},
    Select {
        #[serde(default)]
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        multiple: bool,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Default for FieldKind {
    fn default() -> Self {
        FieldKind::Text {
            min_length: None,
            max_length: None,
        }
    }
}

impl FieldKind {
    /// Build the kind from raw modifier attributes. Unknown types fall back to
    /// text; the second element lists what was ignored.
    pub fn from_attributes(attrs: &BTreeMap<String, String>) -> (FieldKind, Vec<String>) {
        let mut notes = Vec::new();
        let get = |k: &str| attrs.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());
        let flag = |k: &str| attrs.get(k).and_then(|v| parse_flag(v)).unwrap_or(false);
        let uint = |k: &str| get(k).and_then(parse_uint);
        let num = |k: &str| get(k).and_then(parse_number);
        let text = |k: &str| get(k).map(str::to_string);

        let type_name = get("type").map(|t| t.to_ascii_lowercase());
        let kind = match type_name.as_deref() {
            None | Some("text") | Some("string") => FieldKind::Text {
                min_length: uint("min"),
                max_length: uint("max"),
            },
            Some("textarea") | Some("multiline") => FieldKind::Textarea {
                rows: uint("rows"),
                min_length: uint("min"),
                max_length: uint("max"),
            },
            Some("richtext") | Some("wysiwyg") | Some("html") => FieldKind::Richtext {},
            Some("number") | Some("integer") => FieldKind::Number {
                min: num("min"),
                max: num("max"),
                step: num("step"),
            },
            Some("boolean") | Some("toggle") | Some("checkbox") => FieldKind::Boolean {},
            Some("date") => FieldKind::Date {
                min: text("min"),
                max: text("max"),
            },
            Some("image") => FieldKind::Image {
                accept: text("accept"),
                width: uint("width"),
                multiple: flag("multiple"),
            },
            Some("file") => FieldKind::File {
                accept: text("accept"),
                multiple: flag("multiple"),
            },
            Some("url") | Some("link") => FieldKind::Url {},
            Some("email") => FieldKind::Email {},
            Some("color") => FieldKind::Color {},
            Some("select") => FieldKind::Select {
                options: get("options").map(split_options).unwrap_or_default(),
                multiple: flag("multiple"),
            },
            Some(other) => {
                notes.push(format!("unknown field type `{}`, using text", other));
                FieldKind::default()
            }
        };
        (kind, notes)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text { .. } => "text",
            FieldKind::Textarea { .. } => "textarea",
            FieldKind::Richtext {} => "richtext",
            FieldKind::Number { .. } => "number",
            FieldKind::Boolean {} => "boolean",
            FieldKind::Date { .. } => "date",
            FieldKind::Image { .. } => "image",
            FieldKind::File { .. } => "file",
            FieldKind::Url {} => "url",
            FieldKind::Email {} => "email",
            FieldKind::Color {} => "color",
            FieldKind::Select { .. } => "select",
        }
    }

    /// The `config` half of the serialized form.
    pub fn config_json(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("config").map(serde_json::Value::take))
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }

    /// Consistency problems in the configuration. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            FieldKind::Text {
                min_length,
                max_length,
            }
            | FieldKind::Textarea {
                min_length,
                max_length,
                ..
            } => {
                if let (Some(lo), Some(hi)) = (min_length, max_length) {
                    if lo > hi {
                        problems.push(format!("min length {} exceeds max length {}", lo, hi));
                    }
                }
                if let FieldKind::Textarea { rows: Some(0), .. } = self {
                    problems.push("rows must be at least 1".to_string());
                }
            }
            FieldKind::Number { min, max, step } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        problems.push(format!("min {} exceeds max {}", lo, hi));
                    }
                }
                if matches!(step, Some(s) if *s <= 0.0) {
                    problems.push("step must be positive".to_string());
                }
            }
            FieldKind::Date { min, max } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        problems.push(format!("min date {} is after max date {}", lo, hi));
                    }
                }
            }
            FieldKind::Image { width: Some(0), .. } => {
                problems.push("width must be positive".to_string());
            }
            FieldKind::Select { options, .. } => {
                if options.is_empty() {
                    problems.push("select field has no options".to_string());
                }
            }
            _ => {}
        }
        problems
    }
}

// ── Tests ──
