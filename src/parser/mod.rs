pub mod lenient;
pub mod markers;
pub mod modifiers;
pub mod path;

use std::path::{Component, Path};

use crate::error::ExtractError;
use markers::{ExtractOptions, Extraction};

/// Result of extracting one source file. Parse failures stay per-file so a
/// broken template never aborts the whole scan.
#[derive(Debug)]
pub struct FileScan {
    /// Path relative to the scan root, `/`-separated.
    pub file: String,
    pub extraction: Result<Extraction, ExtractError>,
}

/// Read → tokenize → collect markers for a single file.
pub fn process_file(root: &Path, file: &Path, opts: &ExtractOptions) -> FileScan {
    let rel = relative_name(root, file);
    let extraction = std::fs::read_to_string(file)
        .map_err(|source| ExtractError::Read {
            path: file.to_path_buf(),
            source,
        })
        .and_then(|source| markers::extract(&source, &rel, opts));
    FileScan { file: rel, extraction }
}

fn relative_name(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    #[test]
    fn relative_name_uses_forward_slashes() {
        let root = Path::new("/site/src");
        assert_eq!(relative_name(root, &root.join("pages").join("home.html")), "pages/home.html");
        assert_eq!(relative_name(root, Path::new("/elsewhere/x.html")), "elsewhere/x.html");
    }

    #[test]
    fn processes_fixture() {
        let root = fixtures();
        let scan = process_file(&root, &root.join("about.html"), &ExtractOptions::default());
        assert_eq!(scan.file, "about.html");
        let ex = scan.extraction.unwrap();
        assert!(ex.fields.iter().any(|f| f.path == "about.intro.heading"));
        assert!(ex.fields.iter().all(|f| f.file == "about.html"));
    }

    #[test]
    fn broken_fixture_is_per_file_error() {
        let root = fixtures();
        let scan = process_file(&root, &root.join("broken.html"), &ExtractOptions::default());
        assert!(matches!(scan.extraction, Err(ExtractError::Markup { .. })));
    }

    #[test]
    fn missing_file_is_read_error() {
        let root = fixtures();
        let scan = process_file(&root, &root.join("nope.html"), &ExtractOptions::default());
        assert!(matches!(scan.extraction, Err(ExtractError::Read { .. })));
    }
}
