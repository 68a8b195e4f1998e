use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;

pub const DEFAULT_DB_PATH: &str = "data/cms.sqlite";

/// Open (creating parent directories) and prepare the store.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS page (
            id           INTEGER PRIMARY KEY,
            slug         TEXT UNIQUE NOT NULL,
            name         TEXT NOT NULL,
            source_files TEXT NOT NULL DEFAULT '[]',
            field_count  INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS section (
            id              INTEGER PRIMARY KEY,
            page_id         INTEGER NOT NULL REFERENCES page(id) ON DELETE CASCADE,
            slug            TEXT NOT NULL,
            name            TEXT NOT NULL,
            is_repeater     BOOLEAN NOT NULL DEFAULT 0,
            repeater_config TEXT,
            sort_order      INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(page_id, slug)
        );
        CREATE INDEX IF NOT EXISTS idx_section_page ON section(page_id);

        CREATE TABLE IF NOT EXISTS field (
            id            INTEGER PRIMARY KEY,
            section_id    INTEGER NOT NULL REFERENCES section(id) ON DELETE CASCADE,
            path          TEXT UNIQUE NOT NULL,
            type          TEXT NOT NULL,
            label         TEXT NOT NULL,
            placeholder   TEXT,
            required      BOOLEAN NOT NULL DEFAULT 0,
            validation    TEXT,
            config        TEXT NOT NULL DEFAULT '{}',
            default_value TEXT,
            help          TEXT,
            condition     TEXT,
            readonly      BOOLEAN NOT NULL DEFAULT 0,
            hidden        BOOLEAN NOT NULL DEFAULT 0,
            source_files  TEXT NOT NULL DEFAULT '[]',
            source_line   INTEGER NOT NULL DEFAULT 0,
            source_column INTEGER NOT NULL DEFAULT 0,
            sort_order    INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_field_section ON field(section_id);

        CREATE TABLE IF NOT EXISTS content (
            id         INTEGER PRIMARY KEY,
            field_id   INTEGER NOT NULL REFERENCES field(id) ON DELETE CASCADE,
            locale     TEXT NOT NULL,
            value      TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(field_id, locale)
        );

        -- Append-only: rows are never updated.
        CREATE TABLE IF NOT EXISTS content_history (
            id         INTEGER PRIMARY KEY,
            content_id INTEGER NOT NULL REFERENCES content(id) ON DELETE CASCADE,
            value      TEXT,
            changed_by TEXT,
            changed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_history_content ON content_history(content_id);
        ",
    )?;
    Ok(())
}

// ── Schema entities ──
//
// Records hold exactly the columns sync writes, so equality means "nothing to update".

#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub slug: String,
    pub name: String,
    pub source_files: String,
    pub field_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionRecord {
    pub page_id: i64,
    pub slug: String,
    pub name: String,
    pub is_repeater: bool,
    pub repeater_config: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    pub section_id: i64,
    pub path: String,
    pub field_type: String,
    pub label: String,
    pub placeholder: Option<String>,
    pub required: bool,
    pub validation: Option<String>,
    pub config: String,
    pub default_value: Option<String>,
    pub help: Option<String>,
    pub condition: Option<String>,
    pub readonly: bool,
    pub hidden: bool,
    pub source_files: String,
    pub source_line: i64,
    pub source_column: i64,
    pub sort_order: i64,
}

pub fn find_page(conn: &Connection, slug: &str) -> rusqlite::Result<Option<(i64, PageRecord)>> {
    conn.query_row(
        "SELECT id, slug, name, source_files, field_count FROM page WHERE slug = ?1",
        [slug],
        |row| {
            Ok((
                row.get(0)?,
                PageRecord {
                    slug: row.get(1)?,
                    name: row.get(2)?,
                    source_files: row.get(3)?,
                    field_count: row.get(4)?,
                },
            ))
        },
    )
    .optional()
}

pub fn insert_page(conn: &Connection, p: &PageRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO page (slug, name, source_files, field_count) VALUES (?1, ?2, ?3, ?4)",
        params![p.slug, p.name, p.source_files, p.field_count],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_page(conn: &Connection, id: i64, p: &PageRecord) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE page SET name = ?2, source_files = ?3, field_count = ?4, updated_at = datetime('now')
         WHERE id = ?1",
        params![id, p.name, p.source_files, p.field_count],
    )?;
    Ok(())
}

pub fn find_section(conn: &Connection, page_id: i64, slug: &str) -> rusqlite::Result<Option<(i64, SectionRecord)>> {
    conn.query_row(
        "SELECT id, page_id, slug, name, is_repeater, repeater_config, sort_order
         FROM section WHERE page_id = ?1 AND slug = ?2",
        params![page_id, slug],
        |row| {
            Ok((
                row.get(0)?,
                SectionRecord {
                    page_id: row.get(1)?,
                    slug: row.get(2)?,
                    name: row.get(3)?,
                    is_repeater: row.get(4)?,
                    repeater_config: row.get(5)?,
                    sort_order: row.get(6)?,
                },
            ))
        },
    )
    .optional()
}

pub fn insert_section(conn: &Connection, s: &SectionRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO section (page_id, slug, name, is_repeater, repeater_config, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![s.page_id, s.slug, s.name, s.is_repeater, s.repeater_config, s.sort_order],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_section(conn: &Connection, id: i64, s: &SectionRecord) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE section SET name = ?2, is_repeater = ?3, repeater_config = ?4, sort_order = ?5,
                updated_at = datetime('now')
         WHERE id = ?1",
        params![id, s.name, s.is_repeater, s.repeater_config, s.sort_order],
    )?;
    Ok(())
}

const FIELD_COLUMNS: &str = "section_id, path, type, label, placeholder, required, validation, config,
     default_value, help, condition, readonly, hidden, source_files, source_line, source_column, sort_order";

pub fn find_field(conn: &Connection, path: &str) -> rusqlite::Result<Option<(i64, FieldRecord)>> {
    conn.query_row(
        &format!("SELECT id, {} FROM field WHERE path = ?1", FIELD_COLUMNS),
        [path],
        |row| {
            Ok((
                row.get(0)?,
                FieldRecord {
                    section_id: row.get(1)?,
                    path: row.get(2)?,
                    field_type: row.get(3)?,
                    label: row.get(4)?,
                    placeholder: row.get(5)?,
                    required: row.get(6)?,
                    validation: row.get(7)?,
                    config: row.get(8)?,
                    default_value: row.get(9)?,
                    help: row.get(10)?,
                    condition: row.get(11)?,
                    readonly: row.get(12)?,
                    hidden: row.get(13)?,
                    source_files: row.get(14)?,
                    source_line: row.get(15)?,
                    source_column: row.get(16)?,
                    sort_order: row.get(17)?,
                },
            ))
        },
    )
    .optional()
}

pub fn insert_field(conn: &Connection, f: &FieldRecord) -> rusqlite::Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO field ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            FIELD_COLUMNS
        ),
        params![
            f.section_id, f.path, f.field_type, f.label, f.placeholder, f.required, f.validation,
            f.config, f.default_value, f.help, f.condition, f.readonly, f.hidden, f.source_files,
            f.source_line, f.source_column, f.sort_order,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_field(conn: &Connection, id: i64, f: &FieldRecord) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE field SET section_id = ?2, type = ?3, label = ?4, placeholder = ?5, required = ?6,
                validation = ?7, config = ?8, default_value = ?9, help = ?10, condition = ?11,
                readonly = ?12, hidden = ?13, source_files = ?14, source_line = ?15,
                source_column = ?16, sort_order = ?17, updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id, f.section_id, f.field_type, f.label, f.placeholder, f.required, f.validation,
            f.config, f.default_value, f.help, f.condition, f.readonly, f.hidden, f.source_files,
            f.source_line, f.source_column, f.sort_order,
        ],
    )?;
    Ok(())
}

/// (id, slug) of every page.
pub fn page_keys(conn: &Connection) -> rusqlite::Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT id, slug FROM page ORDER BY slug")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (id, `page.section`) of every section.
pub fn section_keys(conn: &Connection) -> rusqlite::Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, p.slug || '.' || s.slug FROM section s JOIN page p ON p.id = s.page_id
         ORDER BY p.slug, s.slug",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (id, path) of every field.
pub fn field_keys(conn: &Connection) -> rusqlite::Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT id, path FROM field ORDER BY path")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_page(conn: &Connection, id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM page WHERE id = ?1", [id])
}

pub fn delete_section(conn: &Connection, id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM section WHERE id = ?1", [id])
}

pub fn delete_field(conn: &Connection, id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM field WHERE id = ?1", [id])
}

// ── Content ──

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRow {
    pub id: i64,
    pub field_id: i64,
    pub path: String,
    pub locale: String,
    pub value: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: i64,
    pub value: Option<String>,
    pub changed_by: Option<String>,
    pub changed_at: String,
}

const CONTENT_SELECT: &str = "SELECT c.id, c.field_id, f.path, c.locale, c.value, c.updated_at
     FROM content c JOIN field f ON f.id = c.field_id";

fn content_from_row(row: &rusqlite::Row) -> rusqlite::Result<ContentRow> {
    Ok(ContentRow {
        id: row.get(0)?,
        field_id: row.get(1)?,
        path: row.get(2)?,
        locale: row.get(3)?,
        value: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn get_content(conn: &Connection, path: &str, locale: &str) -> Result<Option<ContentRow>, StoreError> {
    let row = conn
        .query_row(
            &format!("{} WHERE f.path = ?1 AND c.locale = ?2", CONTENT_SELECT),
            params![path, locale],
            content_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Write a value for (path, locale). The value being replaced goes to history.
pub fn set_content(
    conn: &Connection,
    path: &str,
    locale: &str,
    value: Option<&str>,
    changed_by: Option<&str>,
) -> Result<ContentRow, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let field_id: i64 = tx
        .query_row("SELECT id FROM field WHERE path = ?1", [path], |r| r.get(0))
        .optional()?
        .ok_or_else(|| StoreError::UnknownField(path.to_string()))?;

    let existing: Option<(i64, Option<String>)> = tx
        .query_row(
            "SELECT id, value FROM content WHERE field_id = ?1 AND locale = ?2",
            params![field_id, locale],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, previous)) if previous.as_deref() != value => {
            tx.execute(
                "INSERT INTO content_history (content_id, value, changed_by) VALUES (?1, ?2, ?3)",
                params![id, previous, changed_by],
            )?;
            tx.execute(
                "UPDATE content SET value = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![id, value],
            )?;
        }
        Some(_) => {}
        None => {
            tx.execute(
                "INSERT INTO content (field_id, locale, value) VALUES (?1, ?2, ?3)",
                params![field_id, locale, value],
            )?;
        }
    }

    let row = tx.query_row(
        &format!("{} WHERE c.field_id = ?1 AND c.locale = ?2", CONTENT_SELECT),
        params![field_id, locale],
        content_from_row,
    )?;
    tx.commit()?;
    Ok(row)
}

pub fn list_content(conn: &Connection, locale: &str) -> Result<Vec<ContentRow>, StoreError> {
    let mut stmt = conn.prepare(&format!("{} WHERE c.locale = ?1 ORDER BY f.path", CONTENT_SELECT))?;
    let rows = stmt
        .query_map([locale], content_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Previous values for (path, locale), newest first.
pub fn content_history(conn: &Connection, path: &str, locale: &str) -> Result<Vec<HistoryRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT h.id, h.value, h.changed_by, h.changed_at
         FROM content_history h
         JOIN content c ON c.id = h.content_id
         JOIN field f ON f.id = c.field_id
         WHERE f.path = ?1 AND c.locale = ?2
         ORDER BY h.id DESC",
    )?;
    let rows = stmt
        .query_map(params![path, locale], |row| {
            Ok(HistoryRow {
                id: row.get(0)?,
                value: row.get(1)?,
                changed_by: row.get(2)?,
                changed_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub pages: usize,
    pub sections: usize,
    pub fields: usize,
    pub contents: usize,
    pub history: usize,
}

pub fn get_stats(conn: &Connection) -> rusqlite::Result<Stats> {
    let count = |table: &str| -> rusqlite::Result<usize> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
    };
    Ok(Stats {
        pages: count("page")?,
        sections: count("section")?,
        fields: count("field")?,
        contents: count("content")?,
        history: count("content_history")?,
    })
}

// ── Tests ──
