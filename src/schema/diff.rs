use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::{FieldSchema, PageSchema, ProjectSchema, SectionSchema};

const PAGE_ATTRS: &[&str] = &["name"];
const SECTION_ATTRS: &[&str] = &["name", "isRepeater", "repeaterConfig"];
const FIELD_ATTRS: &[&str] = &[
    "type",
    "config",
    "label",
    "placeholder",
    "required",
    "validation",
    "defaultValue",
    "help",
    "condition",
    "readonly",
    "hidden",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Also report `sortOrder` changes of sections and fields.
    pub include_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub attribute: String,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityChange {
    pub key: String,
    pub changes: Vec<AttributeChange>,
}

/// Keyed differences between two schema snapshots. Keys: page slug,
/// `page.section`, field path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    pub pages_added: Vec<String>,
    pub pages_removed: Vec<String>,
    pub pages_changed: Vec<EntityChange>,
    pub sections_added: Vec<String>,
    pub sections_removed: Vec<String>,
    pub sections_changed: Vec<EntityChange>,
    pub fields_added: Vec<String>,
    pub fields_removed: Vec<String>,
    pub fields_changed: Vec<EntityChange>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.pages_added.is_empty()
            && self.pages_removed.is_empty()
            && self.pages_changed.is_empty()
            && self.sections_added.is_empty()
            && self.sections_removed.is_empty()
            && self.sections_changed.is_empty()
            && self.fields_added.is_empty()
            && self.fields_removed.is_empty()
            && self.fields_changed.is_empty()
    }

    /// One-line `+added -removed ~changed` summary per entity kind.
    pub fn summary(&self) -> String {
        format!(
            "pages +{} -{} ~{} | sections +{} -{} ~{} | fields +{} -{} ~{}",
            self.pages_added.len(),
            self.pages_removed.len(),
            self.pages_changed.len(),
            self.sections_added.len(),
            self.sections_removed.len(),
            self.sections_changed.len(),
            self.fields_added.len(),
            self.fields_removed.len(),
            self.fields_changed.len(),
        )
    }
}

pub fn diff(prev: &ProjectSchema, next: &ProjectSchema) -> SchemaDiff {
    diff_with(prev, next, &DiffOptions::default())
}

pub fn diff_with(prev: &ProjectSchema, next: &ProjectSchema, opts: &DiffOptions) -> SchemaDiff {
    let mut out = SchemaDiff::default();

    let section_attrs = with_order(SECTION_ATTRS, opts);
    let field_attrs = with_order(FIELD_ATTRS, opts);

    compare(
        &pages_by_key(prev),
        &pages_by_key(next),
        PAGE_ATTRS,
        &mut out.pages_added,
        &mut out.pages_removed,
        &mut out.pages_changed,
    );
    compare(
        &sections_by_key(prev),
        &sections_by_key(next),
        &section_attrs,
        &mut out.sections_added,
        &mut out.sections_removed,
        &mut out.sections_changed,
    );
    compare(
        &fields_by_key(prev),
        &fields_by_key(next),
        &field_attrs,
        &mut out.fields_added,
        &mut out.fields_removed,
        &mut out.fields_changed,
    );
    out
}

fn with_order<'a>(attrs: &[&'a str], opts: &DiffOptions) -> Vec<&'a str> {
    let mut v = attrs.to_vec();
    if opts.include_order {
        v.push("sortOrder");
    }
    v
}

fn pages_by_key(schema: &ProjectSchema) -> BTreeMap<String, &PageSchema> {
    schema.pages.iter().map(|p| (p.slug.clone(), p)).collect()
}

fn sections_by_key(schema: &ProjectSchema) -> BTreeMap<String, &SectionSchema> {
    schema
        .pages
        .iter()
        .flat_map(|p| p.sections.iter().map(move |s| (format!("{}.{}", p.slug, s.slug), s)))
        .collect()
}

fn fields_by_key(schema: &ProjectSchema) -> BTreeMap<String, &FieldSchema> {
    schema.fields().map(|(_, _, f)| (f.path.clone(), f)).collect()
}

fn compare<T: Serialize>(
    prev: &BTreeMap<String, &T>,
    next: &BTreeMap<String, &T>,
    attrs: &[&str],
    added: &mut Vec<String>,
    removed: &mut Vec<String>,
    changed: &mut Vec<EntityChange>,
) {
    for (key, after) in next {
        match prev.get(key) {
            None => added.push(key.clone()),
            Some(before) => {
                let changes = changed_attributes(*before, *after, attrs);
                if !changes.is_empty() {
                    changed.push(EntityChange {
                        key: key.clone(),
                        changes,
                    });
                }
            }
        }
    }
    removed.extend(prev.keys().filter(|k| !next.contains_key(*k)).cloned());
}

fn changed_attributes<T: Serialize>(before: &T, after: &T, attrs: &[&str]) -> Vec<AttributeChange> {
    let before = serde_json::to_value(before).unwrap_or(Value::Null);
    let after = serde_json::to_value(after).unwrap_or(Value::Null);
    attrs
        .iter()
        .filter_map(|attr| {
            let b = before.get(*attr).cloned().unwrap_or(Value::Null);
            let a = after.get(*attr).cloned().unwrap_or(Value::Null);
            (a != b).then(|| AttributeChange {
                attribute: attr.to_string(),
                before: b,
                after: a,
            })
        })
        .collect()
}

// ── Tests ──
