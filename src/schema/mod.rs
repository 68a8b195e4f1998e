pub mod assemble;
pub mod diff;
pub mod fields;
pub mod label;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use fields::FieldKind;

/// Version of the serialized schema document.
pub const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub path: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub hidden: bool,
    pub source_files: Vec<String>,
    pub source_line: usize,
    pub source_column: usize,
    pub sort_order: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSchema {
    pub slug: String,
    pub name: String,
    pub is_repeater: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeater_config: Option<RepeaterConfig>,
    pub sort_order: usize,
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSchema {
    pub slug: String,
    pub name: String,
    pub source_files: Vec<String>,
    pub field_count: usize,
    pub sections: Vec<SectionSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMeta {
    pub src_dir: String,
    pub files_scanned: usize,
    pub files_with_markers: usize,
    pub scan_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSchema {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub pages: Vec<PageSchema>,
    pub page_count: usize,
    pub total_fields: usize,
    pub meta: ScanMeta,
}

impl ProjectSchema {
    /// Schema with no pages, the baseline for a first diff.
    pub fn empty() -> Self {
        ProjectSchema {
            version: SCHEMA_VERSION.to_string(),
            generated_at: DateTime::<Utc>::default(),
            pages: Vec::new(),
            page_count: 0,
            total_fields: 0,
            meta: ScanMeta::default(),
        }
    }

    pub fn page(&self, slug: &str) -> Option<&PageSchema> {
        self.pages.iter().find(|p| p.slug == slug)
    }

    pub fn field(&self, path: &str) -> Option<&FieldSchema> {
        self.fields().find(|(_, _, f)| f.path == path).map(|(_, _, f)| f)
    }

    /// Every field with its page and section, in document order.
    pub fn fields(&self) -> impl Iterator<Item = (&PageSchema, &SectionSchema, &FieldSchema)> {
        self.pages.iter().flat_map(|p| {
            p.sections
                .iter()
                .flat_map(move |s| s.fields.iter().map(move |f| (p, s, f)))
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
