use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use cms_schema::config::{self, Settings};
use cms_schema::db;
use cms_schema::scan::{self, ScanOptions, ScanOutcome};
use cms_schema::schema::diff::{self, DiffOptions, SchemaDiff};
use cms_schema::schema::ProjectSchema;
use cms_schema::sync::{self, EntityCounts, SyncOptions, SyncResult};
use cms_schema::watch::{self, WatchEvent, WatchOptions};

#[derive(Parser)]
#[command(name = "cms_schema", about = "Compile data-cms markers into a content schema and sync it to SQLite")]
struct Cli {
    /// Settings file (default: ./cms.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Source directory to scan
    #[arg(long, global = true)]
    src: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan sources and write the schema document
    Scan {
        /// Output file (default: schema_out setting)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the schema to stdout instead of writing a file
        #[arg(long)]
        stdout: bool,
    },
    /// Scan and reconcile the database with the result
    Sync {
        /// Delete pages/sections/fields no longer declared (cascades to content)
        #[arg(long)]
        delete_removed: bool,
    },
    /// Compare a fresh scan with a previous schema document
    Diff {
        /// Previous schema (default: schema_out setting)
        #[arg(short, long)]
        against: Option<PathBuf>,
        /// Also report ordering changes
        #[arg(long)]
        order: bool,
        /// Print the diff as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rescan on every source change
    Watch {
        /// Sync the database after each scan
        #[arg(long)]
        sync: bool,
    },
    /// Read and write field content
    Content {
        #[command(subcommand)]
        action: ContentAction,
    },
    /// Show database statistics
    Stats,
}

#[derive(Subcommand)]
enum ContentAction {
    /// Print the value of one field
    Get {
        path: String,
        #[arg(short, long)]
        locale: Option<String>,
    },
    /// Set the value of one field (previous value goes to history)
    Set {
        path: String,
        value: String,
        #[arg(short, long)]
        locale: Option<String>,
        #[arg(long)]
        author: Option<String>,
    },
    /// List all values for a locale
    List {
        #[arg(short, long)]
        locale: Option<String>,
    },
    /// Show previous values of one field
    History {
        path: String,
        #[arg(short, long)]
        locale: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = config::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(src) = cli.src {
        settings.src_dir = src;
    }
    if let Some(db_path) = cli.db {
        settings.db_path = db_path;
    }

    let result = match cli.command {
        Commands::Scan { out, stdout } => {
            let outcome = run_scan(&settings, true)?;
            let json = outcome.schema.to_json()?;
            if stdout {
                println!("{}", json);
            } else {
                let out = out.unwrap_or_else(|| settings.schema_out.clone());
                write_file(&out, &json)?;
                println!(
                    "Wrote {} ({} pages, {} fields from {} files)",
                    out.display(),
                    outcome.schema.page_count,
                    outcome.schema.total_fields,
                    outcome.schema.meta.files_with_markers,
                );
            }
            Ok(())
        }
        Commands::Sync { delete_removed } => {
            let outcome = run_scan(&settings, true)?;
            let conn = db::open(&settings.db_path)?;
            let opts = SyncOptions {
                delete_removed: delete_removed || settings.delete_removed,
            };
            let result = sync::sync(&conn, &outcome.schema, &opts)?;
            print_sync(&result);
            Ok(())
        }
        Commands::Diff { against, order, json } => {
            let prev_path = against.unwrap_or_else(|| settings.schema_out.clone());
            let prev = read_schema(&prev_path)?;
            let outcome = run_scan(&settings, false)?;
            let d = diff::diff_with(&prev, &outcome.schema, &DiffOptions { include_order: order });
            if json {
                println!("{}", serde_json::to_string_pretty(&d)?);
            } else {
                print_diff(&d);
            }
            Ok(())
        }
        Commands::Watch { sync } => watch_sources(&settings, sync).await,
        Commands::Content { action } => {
            let conn = db::open(&settings.db_path)?;
            content(&conn, action, &settings.default_locale)
        }
        Commands::Stats => {
            let conn = db::open(&settings.db_path)?;
            let s = db::get_stats(&conn)?;
            println!("Pages:    {}", s.pages);
            println!("Sections: {}", s.sections);
            println!("Fields:   {}", s.fields);
            println!("Contents: {}", s.contents);
            println!("History:  {}", s.history);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run_scan(settings: &Settings, show_progress: bool) -> Result<ScanOutcome> {
    let opts = ScanOptions {
        show_progress,
        ..settings.scan_options()
    };
    let outcome = scan::scan_project(&opts)?;
    print_diagnostics(&outcome);
    Ok(outcome)
}

fn print_diagnostics(outcome: &ScanOutcome) {
    if outcome.diagnostics.is_empty() {
        return;
    }
    for d in &outcome.diagnostics {
        eprintln!("  {}", d);
    }
    eprintln!(
        "{} errors, {} warnings",
        outcome.errors().count(),
        outcome.warnings().count()
    );
}

fn read_schema(path: &Path) -> Result<ProjectSchema> {
    if !path.exists() {
        info!(path = %path.display(), "no previous schema, diffing against empty");
        return Ok(ProjectSchema::empty());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    ProjectSchema::from_json(&text).with_context(|| format!("Invalid schema document {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_sync(r: &SyncResult) {
    let row = |kind: &str, c: &EntityCounts| {
        println!(
            "{:<9} +{:<4} ~{:<4} ={:<4} -{:<4} orphaned {}",
            kind, c.created, c.updated, c.unchanged, c.deleted, c.orphaned
        );
    };
    row("pages", &r.pages);
    row("sections", &r.sections);
    row("fields", &r.fields);
    if r.is_noop() {
        println!("Store already up to date.");
    }
}

fn print_diff(d: &SchemaDiff) {
    if d.is_empty() {
        println!("No changes.");
        return;
    }
    let groups = [
        ("page", &d.pages_added, &d.pages_removed, &d.pages_changed),
        ("section", &d.sections_added, &d.sections_removed, &d.sections_changed),
        ("field", &d.fields_added, &d.fields_removed, &d.fields_changed),
    ];
    for (kind, added, removed, changed) in groups {
        for key in added {
            println!("+ {} {}", kind, key);
        }
        for key in removed {
            println!("- {} {}", kind, key);
        }
        for change in changed {
            for c in &change.changes {
                println!("~ {} {}: {} {} -> {}", kind, change.key, c.attribute, c.before, c.after);
            }
        }
    }
    println!("\n{}", d.summary());
}

fn content(conn: &rusqlite::Connection, action: ContentAction, default_locale: &str) -> Result<()> {
    let locale_or = |l: Option<String>| l.unwrap_or_else(|| default_locale.to_string());
    match action {
        ContentAction::Get { path, locale } => {
            let locale = locale_or(locale);
            match db::get_content(conn, &path, &locale)? {
                Some(row) => println!("{}", row.value.unwrap_or_default()),
                None => println!("No content for {} [{}]", path, locale),
            }
        }
        ContentAction::Set {
            path,
            value,
            locale,
            author,
        } => {
            let locale = locale_or(locale);
            let row = db::set_content(conn, &path, &locale, Some(&value), author.as_deref())?;
            println!("Saved {} [{}] at {}", row.path, row.locale, row.updated_at);
        }
        ContentAction::List { locale } => {
            let locale = locale_or(locale);
            let rows = db::list_content(conn, &locale)?;
            if rows.is_empty() {
                println!("No content for locale {}.", locale);
                return Ok(());
            }
            println!("{:<40} | {:<50} | {:<19}", "Path", "Value", "Updated");
            println!("{}", "-".repeat(115));
            for r in &rows {
                let value = truncate(r.value.as_deref().unwrap_or("-"), 50);
                println!("{:<40} | {:<50} | {:<19}", truncate(&r.path, 40), value, r.updated_at);
            }
            println!("\n{} values [{}]", rows.len(), locale);
        }
        ContentAction::History { path, locale } => {
            let locale = locale_or(locale);
            let rows = db::content_history(conn, &path, &locale)?;
            if rows.is_empty() {
                println!("No history for {} [{}]", path, locale);
            }
            for h in rows {
                println!(
                    "{}  {:<12}  {}",
                    h.changed_at,
                    h.changed_by.as_deref().unwrap_or("-"),
                    truncate(h.value.as_deref().unwrap_or("-"), 80)
                );
            }
        }
    }
    Ok(())
}

/// Summary of one watch-triggered scan (and sync, when enabled).
struct WatchRun {
    pages: usize,
    fields: usize,
    errors: usize,
    synced: Option<SyncResult>,
}

async fn watch_sources(settings: &Settings, with_sync: bool) -> Result<()> {
    let mut opts = settings.scan_options();
    opts.src_dir = opts
        .src_dir
        .canonicalize()
        .with_context(|| format!("Source directory {} not found", settings.src_dir.display()))?;

    let (tx, rx) = mpsc::channel(256);
    let filter = opts.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
            for path in event.paths.into_iter().filter(|p| scan::is_candidate(p, &filter)) {
                // Receiver gone means the watch is shutting down.
                let _ = tx.blocking_send(path);
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "watch error"),
    })?;
    watcher
        .watch(&opts.src_dir, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", opts.src_dir.display()))?;

    let db_path = settings.db_path.clone();
    let sync_opts = SyncOptions {
        delete_removed: settings.delete_removed,
    };
    let schema_out = settings.schema_out.clone();
    let scan_opts = opts.clone();
    let mut sub = watch::spawn(
        rx,
        WatchOptions {
            debounce: settings.debounce(),
            initial_scan: true,
        },
        move || -> Result<WatchRun> {
            let outcome = scan::scan_project(&scan_opts)?;
            for d in outcome.errors() {
                eprintln!("  {}", d);
            }
            write_file(&schema_out, &outcome.schema.to_json()?)?;
            let synced = if with_sync {
                let conn = db::open(&db_path)?;
                Some(sync::sync(&conn, &outcome.schema, &sync_opts)?)
            } else {
                None
            };
            Ok(WatchRun {
                pages: outcome.schema.page_count,
                fields: outcome.schema.total_fields,
                errors: outcome.errors().count(),
                synced,
            })
        },
    );

    println!("Watching {} (Ctrl-C to stop)", opts.src_dir.display());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !stopping => {
                println!("Stopping...");
                stopping = true;
                sub.cancel();
            }
            event = sub.next() => match event {
                Some(WatchEvent::Change(path)) => info!(path = %path.display(), "changed"),
                Some(WatchEvent::Start { changes }) => {
                    info!(changes = changes.len(), "scanning");
                }
                Some(WatchEvent::Complete(run)) => {
                    let synced = run
                        .synced
                        .map(|r| format!(", synced +{} ~{} -{}", r.created(), r.updated(), r.deleted()))
                        .unwrap_or_default();
                    println!("{} pages, {} fields, {} errors{}", run.pages, run.fields, run.errors, synced);
                }
                Some(WatchEvent::Error(e)) => eprintln!("Scan failed: {}", e),
                None => break,
            },
        }
    }

    drop(watcher);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
