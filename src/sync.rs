use std::collections::HashSet;
use std::time::{Duration, Instant};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{self, FieldRecord, PageRecord, SectionRecord};
use crate::error::{EntityKind, SyncError};
use crate::schema::{FieldSchema, PageSchema, ProjectSchema, SectionSchema};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Delete persisted pages/sections/fields the schema no longer declares.
    /// Off by default so a partial scan never destroys content.
    pub delete_removed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Present in the store, absent from the schema, kept because deletion was off.
    pub orphaned: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub pages: EntityCounts,
    pub sections: EntityCounts,
    pub fields: EntityCounts,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl SyncResult {
    pub fn created(&self) -> usize {
        self.pages.created + self.sections.created + self.fields.created
    }

    pub fn updated(&self) -> usize {
        self.pages.updated + self.sections.updated + self.fields.updated
    }

    pub fn deleted(&self) -> usize {
        self.pages.deleted + self.sections.deleted + self.fields.deleted
    }

    /// True when the call changed nothing in the store.
    pub fn is_noop(&self) -> bool {
        self.created() == 0 && self.updated() == 0 && self.deleted() == 0
    }
}

/// Reconcile the store with `schema` in a single transaction.
///
/// Pages, then sections, then fields are upserted; only afterwards are
/// removed entities deleted (when enabled). Any failure rolls everything back.
pub fn sync(conn: &Connection, schema: &ProjectSchema, opts: &SyncOptions) -> Result<SyncResult, SyncError> {
    let t0 = Instant::now();
    // IMMEDIATE takes the write lock up front, so concurrent syncs queue instead of interleaving.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(SyncError::Transaction)?;

    let mut result = SyncResult::default();
    let mut kept_pages = HashSet::new();
    let mut kept_sections = HashSet::new();
    let mut kept_fields = HashSet::new();

    for page in &schema.pages {
        let page_id = upsert_page(&tx, page, &mut result.pages)?;
        kept_pages.insert(page_id);
        for section in &page.sections {
            let section_id = upsert_section(&tx, page_id, &page.slug, section, &mut result.sections)?;
            kept_sections.insert(section_id);
            for field in &section.fields {
                let field_id = upsert_field(&tx, section_id, field, &mut result.fields)?;
                kept_fields.insert(field_id);
            }
        }
    }

    // Children first: every kept field already points at a kept section.
    let stale_fields = stale(db::field_keys(&tx), &kept_fields, EntityKind::Field)?;
    let stale_sections = stale(db::section_keys(&tx), &kept_sections, EntityKind::Section)?;
    let stale_pages = stale(db::page_keys(&tx), &kept_pages, EntityKind::Page)?;

    if opts.delete_removed {
        for (id, key) in &stale_fields {
            db::delete_field(&tx, *id).map_err(SyncError::store(EntityKind::Field, key.as_str()))?;
            debug!(path = %key, "deleted field");
        }
        for (id, key) in &stale_sections {
            db::delete_section(&tx, *id).map_err(SyncError::store(EntityKind::Section, key.as_str()))?;
            debug!(section = %key, "deleted section");
        }
        for (id, key) in &stale_pages {
            db::delete_page(&tx, *id).map_err(SyncError::store(EntityKind::Page, key.as_str()))?;
            debug!(page = %key, "deleted page");
        }
        result.fields.deleted = stale_fields.len();
        result.sections.deleted = stale_sections.len();
        result.pages.deleted = stale_pages.len();
    } else {
        result.fields.orphaned = stale_fields.len();
        result.sections.orphaned = stale_sections.len();
        result.pages.orphaned = stale_pages.len();
    }

    tx.commit().map_err(SyncError::Transaction)?;
    result.elapsed = t0.elapsed();

    info!(
        created = result.created(),
        updated = result.updated(),
        deleted = result.deleted(),
        orphaned_fields = result.fields.orphaned,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "sync complete"
    );
    Ok(result)
}

fn stale(
    keys: rusqlite::Result<Vec<(i64, String)>>,
    kept: &HashSet<i64>,
    entity: EntityKind,
) -> Result<Vec<(i64, String)>, SyncError> {
    let keys = keys.map_err(SyncError::store(entity, "*"))?;
    Ok(keys.into_iter().filter(|(id, _)| !kept.contains(id)).collect())
}

fn encode<T: Serialize>(value: &T, entity: EntityKind, key: &str, what: &'static str) -> Result<String, SyncError> {
    serde_json::to_string(value).map_err(|source| SyncError::Encode {
        entity,
        key: key.to_string(),
        what,
        source,
    })
}

fn upsert_page(conn: &Connection, page: &PageSchema, counts: &mut EntityCounts) -> Result<i64, SyncError> {
    let key = page.slug.as_str();
    let record = PageRecord {
        slug: page.slug.clone(),
        name: page.name.clone(),
        source_files: encode(&page.source_files, EntityKind::Page, key, "source files")?,
        field_count: page.field_count as i64,
    };
    let on_err = || SyncError::store(EntityKind::Page, key);

    match db::find_page(conn, key).map_err(on_err())? {
        None => {
            let id = db::insert_page(conn, &record).map_err(on_err())?;
            counts.created += 1;
            Ok(id)
        }
        Some((id, stored)) if stored == record => {
            counts.unchanged += 1;
            Ok(id)
        }
        Some((id, _)) => {
            db::update_page(conn, id, &record).map_err(on_err())?;
            counts.updated += 1;
            Ok(id)
        }
    }
}

fn upsert_section(
    conn: &Connection,
    page_id: i64,
    page_slug: &str,
    section: &SectionSchema,
    counts: &mut EntityCounts,
) -> Result<i64, SyncError> {
    let key = format!("{}.{}", page_slug, section.slug);
    let repeater_config = section
        .repeater_config
        .as_ref()
        .map(|c| encode(c, EntityKind::Section, &key, "repeater config"))
        .transpose()?;
    let record = SectionRecord {
        page_id,
        slug: section.slug.clone(),
        name: section.name.clone(),
        is_repeater: section.is_repeater,
        repeater_config,
        sort_order: section.sort_order as i64,
    };
    let on_err = || SyncError::store(EntityKind::Section, key.as_str());

    match db::find_section(conn, page_id, &section.slug).map_err(on_err())? {
        None => {
            let id = db::insert_section(conn, &record).map_err(on_err())?;
            counts.created += 1;
            Ok(id)
        }
        Some((id, stored)) if stored == record => {
            counts.unchanged += 1;
            Ok(id)
        }
        Some((id, _)) => {
            db::update_section(conn, id, &record).map_err(on_err())?;
            counts.updated += 1;
            Ok(id)
        }
    }
}

fn upsert_field(
    conn: &Connection,
    section_id: i64,
    field: &FieldSchema,
    counts: &mut EntityCounts,
) -> Result<i64, SyncError> {
    let key = field.path.as_str();
    let record = FieldRecord {
        section_id,
        path: field.path.clone(),
        field_type: field.kind.type_name().to_string(),
        label: field.label.clone(),
        placeholder: field.placeholder.clone(),
        required: field.required,
        validation: field.validation.clone(),
        config: encode(&field.kind.config_json(), EntityKind::Field, key, "config")?,
        default_value: field.default_value.clone(),
        help: field.help.clone(),
        condition: field.condition.clone(),
        readonly: field.readonly,
        hidden: field.hidden,
        source_files: encode(&field.source_files, EntityKind::Field, key, "source files")?,
        source_line: field.source_line as i64,
        source_column: field.source_column as i64,
        sort_order: field.sort_order as i64,
    };
    let on_err = || SyncError::store(EntityKind::Field, key);

    // Keyed by path alone: a field that moved sections keeps its id and content.
    match db::find_field(conn, key).map_err(on_err())? {
        None => {
            let id = db::insert_field(conn, &record).map_err(on_err())?;
            counts.created += 1;
            Ok(id)
        }
        Some((id, stored)) if stored == record => {
            counts.unchanged += 1;
            Ok(id)
        }
        Some((id, _)) => {
            db::update_field(conn, id, &record).map_err(on_err())?;
            counts.updated += 1;
            Ok(id)
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::markers::DetectedField;
    use crate::schema::assemble::{assemble, AssembleOptions};
    use crate::schema::ScanMeta;
    use chrono::{DateTime, Utc};

    fn schema(entries: &[(&str, &str, &[(&str, &str)])]) -> ProjectSchema {
        let detected = entries
            .iter()
            .enumerate()
            .map(|(i, (path, file, attrs))| DetectedField {
                path: path.to_string(),
                attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                file: file.to_string(),
                line: i + 1,
                column: 1,
                element_tag: "p".into(),
                text_content: None,
            })
            .collect();
        assemble(detected, ScanMeta::default(), DateTime::<Utc>::default(), &AssembleOptions::default()).schema
    }

    fn two_pages() -> ProjectSchema {
        schema(&[
            ("home.hero.title", "home.html", &[("type", "text")]),
            ("home.hero.subtitle", "home.html", &[("type", "textarea")]),
            ("about.intro.text", "about.html", &[("type", "wysiwyg")]),
        ])
    }

    #[test]
    fn first_sync_creates_everything() {
        let conn = db::open_in_memory().unwrap();
        let r = sync(&conn, &two_pages(), &SyncOptions::default()).unwrap();
        assert_eq!(r.pages.created, 2);
        assert_eq!(r.sections.created, 2);
        assert_eq!(r.fields.created, 3);
        assert_eq!(r.deleted(), 0);
    }

    #[test]
    fn second_sync_is_noop() {
        let conn = db::open_in_memory().unwrap();
        let s = two_pages();
        sync(&conn, &s, &SyncOptions::default()).unwrap();
        let r = sync(&conn, &s, &SyncOptions { delete_removed: true }).unwrap();
        assert!(r.is_noop(), "{:?}", r);
        assert_eq!(r.fields.unchanged, 3);
    }

    #[test]
    fn label_change_updates_and_keeps_content() {
        let conn = db::open_in_memory().unwrap();
        sync(&conn, &two_pages(), &SyncOptions::default()).unwrap();
        db::set_content(&conn, "home.hero.title", "en", Some("Hello"), None).unwrap();

        let renamed = schema(&[
            ("home.hero.title", "home.html", &[("type", "textarea"), ("label", "Headline")]),
            ("home.hero.subtitle", "home.html", &[("type", "textarea")]),
            ("about.intro.text", "about.html", &[("type", "wysiwyg")]),
        ]);
        let r = sync(&conn, &renamed, &SyncOptions { delete_removed: true }).unwrap();
        assert_eq!(r.fields.updated, 1);
        assert_eq!(r.created(), 0);
        let (_, f) = db::find_field(&conn, "home.hero.title").unwrap().unwrap();
        assert_eq!(f.label, "Headline");
        assert_eq!(f.field_type, "textarea");
        let c = db::get_content(&conn, "home.hero.title", "en").unwrap().unwrap();
        assert_eq!(c.value.as_deref(), Some("Hello"));
    }

    #[test]
    fn removed_page_kept_without_delete() {
        let conn = db::open_in_memory().unwrap();
        sync(&conn, &two_pages(), &SyncOptions::default()).unwrap();
        db::set_content(&conn, "about.intro.text", "en", Some("<p>Us</p>"), None).unwrap();

        let home_only = schema(&[
            ("home.hero.title", "home.html", &[("type", "text")]),
            ("home.hero.subtitle", "home.html", &[("type", "textarea")]),
        ]);
        let r = sync(&conn, &home_only, &SyncOptions { delete_removed: false }).unwrap();
        assert_eq!(r.deleted(), 0);
        assert_eq!(r.pages.orphaned, 1);
        assert_eq!(r.fields.orphaned, 1);
        assert!(db::find_page(&conn, "about").unwrap().is_some());
        let c = db::get_content(&conn, "about.intro.text", "en").unwrap().unwrap();
        assert_eq!(c.value.as_deref(), Some("<p>Us</p>"));
    }

    #[test]
    fn removed_page_cascades_with_delete() {
        let conn = db::open_in_memory().unwrap();
        sync(&conn, &two_pages(), &SyncOptions::default()).unwrap();
        db::set_content(&conn, "about.intro.text", "en", Some("a"), None).unwrap();
        db::set_content(&conn, "about.intro.text", "en", Some("b"), None).unwrap();
        db::set_content(&conn, "home.hero.title", "en", Some("keep"), None).unwrap();

        let home_only = schema(&[
            ("home.hero.title", "home.html", &[("type", "text")]),
            ("home.hero.subtitle", "home.html", &[("type", "textarea")]),
        ]);
        let r = sync(&conn, &home_only, &SyncOptions { delete_removed: true }).unwrap();
        assert_eq!(r.pages.deleted, 1);
        assert_eq!(r.sections.deleted, 1);
        assert_eq!(r.fields.deleted, 1);
        assert!(db::find_page(&conn, "about").unwrap().is_none());
        let stats = db::get_stats(&conn).unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.fields, 2);
        assert_eq!(stats.contents, 1);
        assert_eq!(stats.history, 0);
    }

    #[test]
    fn merged_duplicate_is_one_row() {
        let conn = db::open_in_memory().unwrap();
        let s = schema(&[
            ("shared.footer.copyright", "a.html", &[("type", "text")]),
            ("shared.footer.copyright", "b.html", &[("type", "text")]),
        ]);
        let r = sync(&conn, &s, &SyncOptions::default()).unwrap();
        assert_eq!(r.fields.created, 1);
        let (_, f) = db::find_field(&conn, "shared.footer.copyright").unwrap().unwrap();
        assert_eq!(f.source_files, r#"["a.html","b.html"]"#);
        assert_eq!(db::get_stats(&conn).unwrap().fields, 1);
    }

    #[test]
    fn section_becoming_repeater_updates_section() {
        let conn = db::open_in_memory().unwrap();
        sync(&conn, &schema(&[("home.posts.title", "a.html", &[])]), &SyncOptions::default()).unwrap();
        let (page_id, _) = db::find_page(&conn, "home").unwrap().unwrap();
        let (before, _) = db::find_section(&conn, page_id, "posts").unwrap().unwrap();

        let s = schema(&[
            ("home.posts.$", "a.html", &[("max", "3"), ("label", "Post")]),
            ("home.posts.$.title", "a.html", &[]),
        ]);
        let r = sync(&conn, &s, &SyncOptions { delete_removed: true }).unwrap();
        assert_eq!(r.sections.updated, 1);
        assert_eq!(r.fields.created, 1);
        assert_eq!(r.fields.deleted, 1);
        let (after, rec) = db::find_section(&conn, page_id, "posts").unwrap().unwrap();
        assert_eq!(before, after);
        assert!(rec.is_repeater);
        assert_eq!(rec.repeater_config.as_deref(), Some(r#"{"max":3,"itemLabel":"Post"}"#));
    }

    #[test]
    fn failed_sync_rolls_back() {
        let conn = db::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_about BEFORE INSERT ON field
             WHEN NEW.path = 'about.intro.text'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        let err = sync(&conn, &two_pages(), &SyncOptions::default()).unwrap_err();
        match err {
            SyncError::Store { entity, key, .. } => {
                assert_eq!(entity, EntityKind::Field);
                assert_eq!(key, "about.intro.text");
            }
            other => panic!("unexpected error: {other}"),
        }
        let stats = db::get_stats(&conn).unwrap();
        assert_eq!(stats.pages, 0);
        assert_eq!(stats.fields, 0);
    }
}
