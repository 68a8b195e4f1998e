use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::label::{derive_label, label_for_path};
use super::{FieldKind, FieldSchema, PageSchema, ProjectSchema, RepeaterConfig, ScanMeta, SectionSchema, SCHEMA_VERSION};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::parser::markers::DetectedField;
use crate::parser::modifiers::{parse_flag, parse_uint};
use crate::parser::path::{self, ParsedPath};

/// What to do when one path is declared with different modifiers in two places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the first declaration in traversal order and warn.
    #[default]
    FirstWins,
    /// Drop the field and report a validation error.
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions {
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug)]
pub struct Assembly {
    pub schema: ProjectSchema,
    pub diagnostics: Vec<Diagnostic>,
}

/// Everything known about one section while grouping.
#[derive(Default)]
struct SectionDraft {
    first_seen: usize,
    name: Option<String>,
    item_label: Option<String>,
    min: Option<u32>,
    max: Option<u32>,
    rooted_repeater: bool,
    files: BTreeSet<String>,
    fields: Vec<String>,
}

struct FieldDraft {
    parsed: ParsedPath,
    first: DetectedField,
    first_seen: usize,
    files: BTreeSet<String>,
    rejected: bool,
}

/// Build the nested schema from every detected marker of a scan.
///
/// Input order does not matter: records are sorted by (file, line, column)
/// first, which is also the traversal order used for first-wins decisions.
pub fn assemble(
    mut detected: Vec<DetectedField>,
    meta: ScanMeta,
    generated_at: DateTime<Utc>,
    opts: &AssembleOptions,
) -> Assembly {
    detected.sort_by(|a, b| {
        (&a.file, a.line, a.column, &a.path).cmp(&(&b.file, b.line, b.column, &b.path))
    });

    let mut diagnostics = Vec::new();
    let mut sections: BTreeMap<(String, String), SectionDraft> = BTreeMap::new();
    let mut fields: BTreeMap<String, FieldDraft> = BTreeMap::new();

    for (ordinal, det) in detected.into_iter().enumerate() {
        let parsed = match path::parse(&det.path) {
            Ok(p) => p,
            Err(e) => {
                diagnostics.push(
                    Diagnostic::error(DiagnosticKind::Validation, e.to_string())
                        .at(&det.file, det.line, det.column)
                        .for_path(&det.path),
                );
                continue;
            }
        };

        let section = sections.entry(parsed.section_key()).or_insert_with(|| SectionDraft {
            first_seen: ordinal,
            ..Default::default()
        });
        section.files.insert(det.file.clone());

        if parsed.is_section_root() {
            apply_section_root(section, &parsed, &det);
            continue;
        }

        let canonical = path::build(&parsed);
        match fields.get_mut(&canonical) {
            None => {
                section.fields.push(canonical.clone());
                let mut files = BTreeSet::new();
                files.insert(det.file.clone());
                fields.insert(
                    canonical,
                    FieldDraft {
                        parsed,
                        first: det,
                        first_seen: ordinal,
                        files,
                        rejected: false,
                    },
                );
            }
            Some(existing) => {
                existing.files.insert(det.file.clone());
                if existing.first.attributes == det.attributes {
                    continue;
                }
                let message = format!(
                    "conflicting modifiers for `{}` (first declared at {}:{}:{})",
                    canonical, existing.first.file, existing.first.line, existing.first.column
                );
                let diag = match opts.duplicate_policy {
                    DuplicatePolicy::FirstWins => Diagnostic::warning(DiagnosticKind::Duplicate, message),
                    DuplicatePolicy::Error => {
                        existing.rejected = true;
                        Diagnostic::error(DiagnosticKind::Validation, message)
                    }
                };
                diagnostics.push(diag.at(&det.file, det.line, det.column).for_path(&canonical));
            }
        }
    }

    // Group finished sections by page; BTreeMap keeps pages sorted by slug.
    let mut pages: BTreeMap<String, Vec<(usize, SectionSchema, BTreeSet<String>)>> = BTreeMap::new();
    for ((page_slug, section_slug), draft) in sections {
        let mut built: Vec<(i64, usize, FieldSchema)> = draft
            .fields
            .iter()
            .filter_map(|p| fields.get(p))
            .filter(|d| !d.rejected)
            .map(|d| {
                let explicit = d.first.attributes.get("order").and_then(|o| o.trim().parse::<i64>().ok());
                (explicit.unwrap_or(i64::MAX), d.first_seen, build_field(d, &mut diagnostics))
            })
            .collect();
        built.sort_by_key(|(order, seen, _)| (*order, *seen));

        let is_repeater = draft.rooted_repeater
            || draft
                .fields
                .iter()
                .filter_map(|p| fields.get(p))
                .filter(|d| !d.rejected)
                .any(|d| d.parsed.is_repeater);

        let field_list: Vec<FieldSchema> = built
            .into_iter()
            .enumerate()
            .map(|(i, (_, _, mut f))| {
                f.sort_order = i;
                f
            })
            .collect();

        let repeater_config = is_repeater.then(|| RepeaterConfig {
            min: draft.min,
            max: draft.max,
            item_label: draft.item_label.clone(),
        });

        let section = SectionSchema {
            name: draft.name.clone().unwrap_or_else(|| derive_label(&section_slug)),
            slug: section_slug,
            is_repeater,
            repeater_config,
            sort_order: 0,
            fields: field_list,
        };
        pages
            .entry(page_slug)
            .or_default()
            .push((draft.first_seen, section, draft.files));
    }

    let mut page_list = Vec::with_capacity(pages.len());
    for (slug, mut entries) in pages {
        entries.sort_by_key(|(seen, _, _)| *seen);
        let mut source_files = BTreeSet::new();
        let mut sections = Vec::with_capacity(entries.len());
        for (i, (_, mut section, files)) in entries.into_iter().enumerate() {
            section.sort_order = i;
            source_files.extend(files);
            sections.push(section);
        }
        let field_count = sections.iter().map(|s| s.fields.len()).sum();
        page_list.push(PageSchema {
            name: derive_label(&slug),
            slug,
            source_files: source_files.into_iter().collect(),
            field_count,
            sections,
        });
    }

    let total_fields = page_list.iter().map(|p| p.field_count).sum();
    debug!(pages = page_list.len(), fields = total_fields, issues = diagnostics.len(), "assembled schema");

    Assembly {
        schema: ProjectSchema {
            version: SCHEMA_VERSION.to_string(),
            generated_at,
            page_count: page_list.len(),
            total_fields,
            pages: page_list,
            meta,
        },
        diagnostics,
    }
}

/// `page.section` or `page.section.$` markers configure the section itself.
fn apply_section_root(section: &mut SectionDraft, parsed: &ParsedPath, det: &DetectedField) {
    let label = det.attributes.get("label").map(|l| l.trim()).filter(|l| !l.is_empty());
    if parsed.is_repeater {
        section.rooted_repeater = true;
        if section.item_label.is_none() {
            section.item_label = label.map(str::to_string);
        }
    } else if section.name.is_none() {
        section.name = label.map(str::to_string);
    }
    if section.min.is_none() {
        section.min = det.attributes.get("min").and_then(|v| parse_uint(v));
    }
    if section.max.is_none() {
        section.max = det.attributes.get("max").and_then(|v| parse_uint(v));
    }
}

fn build_field(draft: &FieldDraft, diagnostics: &mut Vec<Diagnostic>) -> FieldSchema {
    let det = &draft.first;
    let canonical = path::build(&draft.parsed);
    let attr = |k: &str| det.attributes.get(k).map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string);
    let flag = |k: &str| det.attributes.get(k).and_then(|v| parse_flag(v)).unwrap_or(false);

    let (kind, notes) = FieldKind::from_attributes(&det.attributes);
    for note in notes.into_iter().chain(kind.validate()) {
        diagnostics.push(
            Diagnostic::warning(DiagnosticKind::FieldConfig, note)
                .at(&det.file, det.line, det.column)
                .for_path(&canonical),
        );
    }

    FieldSchema {
        label: attr("label").unwrap_or_else(|| label_for_path(&canonical)),
        placeholder: attr("placeholder"),
        required: flag("required"),
        validation: attr("validation"),
        default_value: det
            .attributes
            .get("default")
            .cloned()
            .or_else(|| det.text_content.clone()),
        help: attr("help"),
        condition: attr("condition"),
        readonly: flag("readonly"),
        hidden: flag("hidden"),
        source_files: draft.files.iter().cloned().collect(),
        source_line: det.line,
        source_column: det.column,
        sort_order: 0,
        kind,
        path: canonical,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use crate::parser::markers::{extract, ExtractOptions};

    fn field(path: &str, file: &str, line: usize, attrs: &[(&str, &str)]) -> DetectedField {
        DetectedField {
            path: path.to_string(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            file: file.to_string(),
            line,
            column: 1,
            element_tag: "div".to_string(),
            text_content: None,
        }
    }

    fn run(detected: Vec<DetectedField>) -> Assembly {
        assemble(detected, ScanMeta::default(), DateTime::<Utc>::default(), &AssembleOptions::default())
    }

    #[test]
    fn two_files_two_pages() {
        let out = run(vec![
            field("home.hero.title", "home.html", 3, &[("type", "text")]),
            field("about.intro.text", "about.html", 5, &[("type", "wysiwyg")]),
        ]);
        assert_eq!(out.schema.page_count, 2);
        assert_eq!(out.schema.total_fields, 2);
        assert_eq!(out.schema.pages[0].slug, "about");
        assert_eq!(out.schema.pages[1].slug, "home");
        let text = out.schema.field("about.intro.text").unwrap();
        assert_eq!(text.kind, FieldKind::Richtext {});
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn identical_duplicates_merge() {
        let out = run(vec![
            field("shared.footer.copyright", "b.html", 2, &[("type", "text")]),
            field("shared.footer.copyright", "a.html", 9, &[("type", "text")]),
        ]);
        assert_eq!(out.schema.total_fields, 1);
        let f = out.schema.field("shared.footer.copyright").unwrap();
        assert_eq!(f.source_files, vec!["a.html", "b.html"]);
        assert_eq!(f.source_line, 9);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn conflicting_duplicates_first_wins() {
        let out = run(vec![
            field("home.hero.title", "b.html", 1, &[("label", "Second")]),
            field("home.hero.title", "a.html", 1, &[("label", "First")]),
        ]);
        let f = out.schema.field("home.hero.title").unwrap();
        assert_eq!(f.label, "First");
        assert_eq!(f.source_files.len(), 2);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::Duplicate);
        assert_eq!(out.diagnostics[0].severity, Severity::Warning);
        assert_eq!(out.diagnostics[0].file.as_deref(), Some("b.html"));
    }

    #[test]
    fn conflicting_duplicates_error_policy() {
        let opts = AssembleOptions {
            duplicate_policy: DuplicatePolicy::Error,
        };
        let out = assemble(
            vec![
                field("home.hero.title", "a.html", 1, &[("label", "First")]),
                field("home.hero.title", "b.html", 1, &[("label", "Second")]),
                field("home.hero.body", "a.html", 2, &[]),
            ],
            ScanMeta::default(),
            DateTime::<Utc>::default(),
            &opts,
        );
        assert!(out.schema.field("home.hero.title").is_none());
        assert_eq!(out.schema.total_fields, 1);
        assert!(out.diagnostics.iter().any(|d| d.is_error() && d.kind == DiagnosticKind::Validation));
    }

    #[test]
    fn rejected_repeater_field_leaves_plain_section() {
        let opts = AssembleOptions {
            duplicate_policy: DuplicatePolicy::Error,
        };
        let out = assemble(
            vec![
                field("home.posts.$.title", "a.html", 1, &[("label", "First")]),
                field("home.posts.$.title", "b.html", 1, &[("label", "Second")]),
            ],
            ScanMeta::default(),
            DateTime::<Utc>::default(),
            &opts,
        );
        let posts = &out.schema.page("home").unwrap().sections[0];
        assert!(posts.fields.is_empty());
        assert!(!posts.is_repeater);
        assert!(posts.repeater_config.is_none());
    }

    #[test]
    fn bare_and_explicit_flags_merge() {
        let opts = AssembleOptions {
            duplicate_policy: DuplicatePolicy::Error,
        };
        let ex = ExtractOptions::default();
        let bare = extract(r#"<p data-cms="a.b.c" data-cms-required>x</p>"#, "a.html", &ex).unwrap();
        let explicit = extract(r#"<p data-cms="a.b.c" data-cms-required="true">x</p>"#, "b.html", &ex).unwrap();
        let mut detected = bare.fields;
        detected.extend(explicit.fields);

        let out = assemble(detected, ScanMeta::default(), DateTime::<Utc>::default(), &opts);
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let f = out.schema.field("a.b.c").unwrap();
        assert!(f.required);
        assert_eq!(f.source_files, vec!["a.html", "b.html"]);
    }

    #[test]
    fn invalid_paths_reported_not_dropped() {
        let out = run(vec![field("home", "a.html", 4, &[]), field("home.hero.title", "a.html", 5, &[])]);
        assert_eq!(out.schema.total_fields, 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line, Some(4));
        assert_eq!(out.diagnostics[0].path.as_deref(), Some("home"));
    }

    #[test]
    fn repeater_section() {
        let out = run(vec![
            field("home.posts.$", "a.html", 1, &[("min", "1"), ("max", "6"), ("label", "Post")]),
            field("home.posts.$.title", "a.html", 2, &[]),
            field("home.posts.$.body", "a.html", 3, &[("type", "richtext")]),
        ]);
        let section = &out.schema.pages[0].sections[0];
        assert!(section.is_repeater);
        assert_eq!(section.name, "Posts");
        assert_eq!(
            section.repeater_config,
            Some(RepeaterConfig {
                min: Some(1),
                max: Some(6),
                item_label: Some("Post".into())
            })
        );
        assert_eq!(section.fields.len(), 2);
        assert_eq!(out.schema.total_fields, 2);
    }

    #[test]
    fn repeater_without_root() {
        let out = run(vec![field("home.posts.$.title", "a.html", 1, &[])]);
        let section = &out.schema.pages[0].sections[0];
        assert!(section.is_repeater);
        assert_eq!(section.repeater_config, Some(RepeaterConfig::default()));
    }

    #[test]
    fn section_root_names_section() {
        let out = run(vec![
            field("home.hero", "a.html", 1, &[("label", "Hero Banner")]),
            field("home.hero.title", "a.html", 2, &[]),
        ]);
        let section = &out.schema.pages[0].sections[0];
        assert_eq!(section.name, "Hero Banner");
        assert!(!section.is_repeater);
        assert!(section.repeater_config.is_none());
    }

    #[test]
    fn explicit_order_then_occurrence() {
        let out = run(vec![
            field("home.hero.a", "a.html", 1, &[]),
            field("home.hero.b", "a.html", 2, &[("order", "0")]),
            field("home.hero.c", "a.html", 3, &[]),
        ]);
        let paths: Vec<&str> = out.schema.pages[0].sections[0]
            .fields
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["home.hero.b", "home.hero.a", "home.hero.c"]);
        let orders: Vec<usize> = out.schema.pages[0].sections[0].fields.iter().map(|f| f.sort_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn sections_ordered_by_first_occurrence() {
        let out = run(vec![
            field("home.zeta.title", "a.html", 1, &[]),
            field("home.alpha.title", "a.html", 2, &[]),
        ]);
        let slugs: Vec<&str> = out.schema.pages[0].sections.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["zeta", "alpha"]);
        assert_eq!(out.schema.pages[0].sections[1].sort_order, 1);
    }

    #[test]
    fn labels_and_defaults() {
        let mut det = field("home.hero.ctaButtonText", "a.html", 1, &[("required", "")]);
        det.text_content = Some("Go".into());
        let out = run(vec![det, field("home.hero.title", "a.html", 2, &[("default", "Hi"), ("label", "Headline")])]);
        let cta = out.schema.field("home.hero.ctaButtonText").unwrap();
        assert_eq!(cta.label, "Cta Button Text");
        assert_eq!(cta.default_value.as_deref(), Some("Go"));
        assert!(cta.required);
        let title = out.schema.field("home.hero.title").unwrap();
        assert_eq!(title.label, "Headline");
        assert_eq!(title.default_value.as_deref(), Some("Hi"));
    }

    #[test]
    fn field_config_problems_are_warnings() {
        let out = run(vec![field("a.b.pick", "a.html", 1, &[("type", "select")])]);
        assert_eq!(out.schema.total_fields, 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::FieldConfig);
    }

    #[test]
    fn input_order_irrelevant() {
        let input = vec![
            field("home.hero.title", "home.html", 3, &[("type", "text")]),
            field("home.posts.$.title", "home.html", 9, &[]),
            field("about.intro.text", "about.html", 5, &[("type", "wysiwyg")]),
            field("shared.footer.copyright", "about.html", 8, &[]),
            field("shared.footer.copyright", "home.html", 20, &[]),
        ];
        let mut reversed = input.clone();
        reversed.reverse();
        let a = run(input).schema.to_json().unwrap();
        let b = run(reversed).schema.to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fixtures_end_to_end() {
        let opts = ExtractOptions::default();
        let mut detected = Vec::new();
        for name in ["home.html", "about.html"] {
            let src = std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap();
            detected.extend(extract(&src, name, &opts).unwrap().fields);
        }
        let out = run(detected);
        assert_eq!(out.schema.page_count, 3);
        let home = out.schema.page("home").unwrap();
        assert_eq!(home.sections[0].name, "Hero Banner");
        assert_eq!(home.sections[0].fields[0].path, "home.hero.cta_label");
        let posts = &home.sections[1];
        assert!(posts.is_repeater);
        assert_eq!(posts.repeater_config.as_ref().and_then(|c| c.max), Some(6));
        let body = out.schema.field("home.posts.$.body").unwrap();
        assert_eq!(body.default_value.as_deref(), Some("Hello & welcome"));
        assert_eq!(out.schema.field("home.hero.title").map(|f| f.required), Some(true));
    }
}
