use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Diagnostic, DiagnosticKind, ScanError, Severity};
use crate::parser::markers::ExtractOptions;
use crate::parser::{self, FileScan};
use crate::schema::assemble::{assemble, AssembleOptions, Assembly};
use crate::schema::{ProjectSchema, ScanMeta};

pub const DEFAULT_EXTENSIONS: &[&str] = &["html", "htm", "jsx", "tsx", "vue", "svelte", "astro"];
pub const DEFAULT_IGNORE_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", "target"];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub src_dir: PathBuf,
    /// Lowercase, without the leading dot.
    pub extensions: Vec<String>,
    /// Directory names skipped at any depth.
    pub ignore_dirs: Vec<String>,
    pub extract: ExtractOptions,
    pub assemble: AssembleOptions,
    pub show_progress: bool,
}

impl ScanOptions {
    pub fn new(src_dir: impl Into<PathBuf>) -> Self {
        ScanOptions {
            src_dir: src_dir.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            extract: ExtractOptions::default(),
            assemble: AssembleOptions::default(),
            show_progress: false,
        }
    }
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub schema: ProjectSchema,
    pub diagnostics: Vec<Diagnostic>,
    /// Every file that was read, relative to the source root.
    pub files: Vec<String>,
}

impl ScanOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Discover, extract and assemble everything under `opts.src_dir`.
pub fn scan_project(opts: &ScanOptions) -> Result<ScanOutcome, ScanError> {
    if !opts.src_dir.exists() {
        return Err(ScanError::MissingRoot(opts.src_dir.clone()));
    }
    if !opts.src_dir.is_dir() {
        return Err(ScanError::NotADirectory(opts.src_dir.clone()));
    }
    let files = discover_files(opts);
    debug!(count = files.len(), root = %opts.src_dir.display(), "discovered files");
    Ok(scan_files(opts, &files))
}

/// Markup files under the source root, sorted by path.
pub fn discover_files(opts: &ScanOptions) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(&opts.src_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e, &opts.ignore_dirs))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), &opts.extensions))
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Whether a changed path could affect the schema: right extension, not under
/// an ignored directory. Used to filter raw filesystem events.
pub fn is_candidate(path: &Path, opts: &ScanOptions) -> bool {
    let rel = path.strip_prefix(&opts.src_dir).unwrap_or(path);
    has_extension(path, &opts.extensions)
        && !rel.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|name| opts.ignore_dirs.iter().any(|i| i == name))
        })
}

fn is_ignored_dir(entry: &DirEntry, ignore: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| ignore.iter().any(|i| i == name))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Extract `files` in parallel and assemble one schema.
///
/// Files that fail to parse are skipped with a `Parse` diagnostic. Results
/// are ordered by file before assembly, so worker scheduling never shows in
/// the output.
pub fn scan_files(opts: &ScanOptions, files: &[PathBuf]) -> ScanOutcome {
    let t0 = Instant::now();

    let pb = if opts.show_progress {
        ProgressBar::new(files.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let mut results: Vec<FileScan> = files
        .par_iter()
        .map(|file| {
            let scan = parser::process_file(&opts.src_dir, file, &opts.extract);
            pb.inc(1);
            scan
        })
        .collect();
    pb.finish_and_clear();
    results.sort_by(|a, b| a.file.cmp(&b.file));

    let mut diagnostics = Vec::new();
    let mut detected = Vec::new();
    let mut scanned = Vec::with_capacity(results.len());
    let mut with_markers = 0;

    for scan in results {
        match scan.extraction {
            Ok(ex) => {
                debug!(file = %scan.file, fields = ex.fields.len(), "extracted");
                if !ex.fields.is_empty() {
                    with_markers += 1;
                }
                detected.extend(ex.fields);
                diagnostics.extend(ex.warnings);
            }
            Err(e) => {
                warn!(file = %scan.file, error = %e, "skipping file");
                diagnostics.push(Diagnostic::error(DiagnosticKind::Parse, e.to_string()).in_file(&scan.file));
            }
        }
        scanned.push(scan.file);
    }

    let meta = ScanMeta {
        src_dir: opts.src_dir.display().to_string(),
        files_scanned: files.len(),
        files_with_markers: with_markers,
        scan_duration_ms: 0,
    };
    let Assembly {
        mut schema,
        diagnostics: assembly_diagnostics,
    } = assemble(detected, meta, Utc::now(), &opts.assemble);
    diagnostics.extend(assembly_diagnostics);
    schema.meta.scan_duration_ms = t0.elapsed().as_millis() as u64;

    info!(
        files = schema.meta.files_scanned,
        with_markers = schema.meta.files_with_markers,
        pages = schema.page_count,
        fields = schema.total_fields,
        diagnostics = diagnostics.len(),
        elapsed_ms = schema.meta.scan_duration_ms,
        "scan complete"
    );

    ScanOutcome {
        schema,
        diagnostics,
        files: scanned,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::assemble::DuplicatePolicy;
    use std::fs;

    fn fixture(name: &str) -> String {
        fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)).unwrap()
    }

    /// Temp project with the fixtures laid out like a small site.
    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pages")).unwrap();
        fs::create_dir_all(root.join("components")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("pages/home.html"), fixture("home.html")).unwrap();
        fs::write(root.join("pages/about.html"), fixture("about.html")).unwrap();
        fs::write(root.join("pages/broken.html"), fixture("broken.html")).unwrap();
        fs::write(root.join("components/Header.jsx"), fixture("Header.jsx")).unwrap();
        fs::write(root.join("node_modules/pkg/index.html"), r#"<p data-cms="vendor.x.y">v</p>"#).unwrap();
        fs::write(root.join("pages/notes.txt"), r#"<p data-cms="notes.x.y">n</p>"#).unwrap();
        dir
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = project();
        let files = discover_files(&ScanOptions::new(dir.path()));
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            names,
            vec!["components/Header.jsx", "pages/about.html", "pages/broken.html", "pages/home.html"]
        );
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(has_extension(Path::new("a/Index.HTML"), &["html".into()]));
        assert!(!has_extension(Path::new("a/Makefile"), &["html".into()]));
    }

    #[test]
    fn candidate_paths() {
        let opts = ScanOptions::new("/site");
        assert!(is_candidate(Path::new("/site/pages/home.html"), &opts));
        assert!(!is_candidate(Path::new("/site/node_modules/x/a.html"), &opts));
        assert!(!is_candidate(Path::new("/site/pages/home.html.swp"), &opts));
    }

    #[test]
    fn scan_skips_broken_and_merges_duplicates() {
        let dir = project();
        let out = scan_project(&ScanOptions::new(dir.path())).unwrap();

        let errors: Vec<_> = out.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::Parse);
        assert_eq!(errors[0].file.as_deref(), Some("pages/broken.html"));
        assert!(out.warnings().all(|w| w.kind != DiagnosticKind::Duplicate));

        let s = &out.schema;
        assert_eq!(s.meta.files_scanned, 4);
        assert_eq!(s.meta.files_with_markers, 3);
        let slugs: Vec<&str> = s.pages.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["about", "home", "shared"]);
        let copyright = s.field("shared.footer.copyright").unwrap();
        assert_eq!(copyright.source_files, vec!["components/Header.jsx", "pages/about.html"]);
        assert!(s.page("vendor").is_none());
        assert!(s.page("notes").is_none());
    }

    #[test]
    fn rescans_are_identical_apart_from_timing() {
        let dir = project();
        let opts = ScanOptions::new(dir.path());
        let mut a = scan_project(&opts).unwrap().schema;
        let mut b = scan_project(&opts).unwrap().schema;
        for s in [&mut a, &mut b] {
            s.generated_at = Default::default();
            s.meta.scan_duration_ms = 0;
        }
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn schema_document_reloads() {
        let dir = project();
        let schema = scan_project(&ScanOptions::new(dir.path())).unwrap().schema;
        let json = schema.to_json().unwrap();
        assert!(json.contains("\"generatedAt\""));
        assert!(json.contains("\"type\": \"richtext\""));
        assert_eq!(ProjectSchema::from_json(&json).unwrap(), schema);
    }

    #[test]
    fn conflicting_duplicate_rejected_under_error_policy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), r#"<p data-cms="x.y.z" data-cms-type="text">a</p>"#).unwrap();
        fs::write(dir.path().join("b.html"), r#"<p data-cms="x.y.z" data-cms-type="textarea">b</p>"#).unwrap();

        let mut opts = ScanOptions::new(dir.path());
        let out = scan_project(&opts).unwrap();
        assert_eq!(out.schema.field("x.y.z").unwrap().kind.type_name(), "text");
        assert!(out.warnings().any(|w| w.kind == DiagnosticKind::Duplicate));

        opts.assemble.duplicate_policy = DuplicatePolicy::Error;
        let out = scan_project(&opts).unwrap();
        assert!(out.schema.field("x.y.z").is_none());
        assert!(out.has_errors());
    }

    #[test]
    fn missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_project(&ScanOptions::new(dir.path().join("nope"))).unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    #[test]
    fn empty_tree_gives_empty_schema() {
        let dir = tempfile::tempdir().unwrap();
        let out = scan_project(&ScanOptions::new(dir.path())).unwrap();
        assert!(out.schema.pages.is_empty());
        assert_eq!(out.schema.total_fields, 0);
        assert!(out.diagnostics.is_empty());
    }
}
